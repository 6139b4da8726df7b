use std::fmt;

/// Unrecoverable configuration problem (bad YAML, DDL partition without a
/// setup spec, unknown generator). Aborts only the owning partition when raised
/// during a run, or the whole process when raised at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Provisioning the handles of one partition failed.
#[derive(Debug)]
pub struct SetupError {
    pub partition: String,
    pub source: anyhow::Error,
}

impl SetupError {
    pub fn new(partition: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            partition: partition.into(),
            source,
        }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup failed for {}: {:#}", self.partition, self.source)
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Transient capacity signal from a database or model call.
///
/// Work functions return it (wrapped in `anyhow::Error`) to ask the
/// [`RateLimiter`](crate::rate_limit::RateLimiter) for a backoff and retry.
/// The limiter returns it again, with `attempts` filled in, once every attempt
/// has been used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceExhausted {
    pub detail: String,
    pub attempts: u32,
}

impl ResourceExhausted {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            attempts: 0,
        }
    }
}

impl fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts > 0 {
            write!(
                f,
                "resource exhausted after {} attempts: {}",
                self.attempts, self.detail
            )
        } else {
            write!(f, "resource exhausted: {}", self.detail)
        }
    }
}

impl std::error::Error for ResourceExhausted {}

pub fn is_resource_exhausted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ResourceExhausted>().is_some()
}

pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<ConfigError>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_is_detected_through_anyhow() {
        let err: anyhow::Error = ResourceExhausted::new("database is locked").into();
        assert!(is_resource_exhausted(&err));

        let other = anyhow::anyhow!("syntax error near SELEC");
        assert!(!is_resource_exhausted(&other));
    }

    #[test]
    fn test_config_error_is_found_in_chain() {
        let err = anyhow::Error::new(ConfigError("no setup spec for ddl".into()))
            .context("building ddl queue");
        assert!(is_config_error(&err));
        assert!(format!("{:#}", err).contains("no setup spec for ddl"));
    }

    #[test]
    fn test_exhausted_display_mentions_attempts() {
        let mut e = ResourceExhausted::new("429 Too Many Requests");
        assert_eq!(e.to_string(), "resource exhausted: 429 Too Many Requests");
        e.attempts = 3;
        assert_eq!(
            e.to_string(),
            "resource exhausted after 3 attempts: 429 Too Many Requests"
        );
    }
}
