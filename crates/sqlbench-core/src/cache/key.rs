use sha2::{Digest, Sha256};

/// Collapses whitespace runs to one space and trims, so formatting-only
/// differences in a query hit the same entry.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut h = Sha256::new();
    h.update(namespace.as_bytes());
    for p in parts {
        h.update(b"\n");
        h.update(p.as_bytes());
    }
    format!("{:x}", h.finalize())
}
