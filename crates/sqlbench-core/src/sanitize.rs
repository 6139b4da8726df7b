/// Strips the markdown and escaping noise models wrap around SQL.
pub fn sanitize_sql(raw: &str) -> String {
    let mut s = raw
        .replace("```sql", "")
        .replace("```", "")
        .replace("sql: \"", "")
        .replace("\\n", " ")
        .replace('\\', "")
        .replace('`', "");
    while s.contains("  ") {
        s = s.replace("  ", " ");
    }
    s.trim().to_string()
}
