//! Error types for `gatehouse-core`.
//!
//! Admission decisions themselves never fail: an exhausted bucket is a normal
//! "deny" outcome. The only fallible step is validating the configuration
//! handed to the registry at startup.

/// Unified error type for core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A registry setting is out of range (non-positive rate, burst, ttl, ...).
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),

    /// A strategy name did not match any known strategy.
    #[error("unknown rate limit strategy: {0}")]
    UnknownStrategy(String),
}

/// Convenience alias used throughout `gatehouse-core`.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_displays_message() {
        let err = CoreError::InvalidConfig("burst must be greater than 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid rate limit config: burst must be greater than 0"
        );
    }

    #[test]
    fn unknown_strategy_displays_name() {
        let err = CoreError::UnknownStrategy("cookie".to_string());
        assert_eq!(err.to_string(), "unknown rate limit strategy: cookie");
    }

    #[test]
    fn core_result_err() {
        let result: CoreResult<()> = Err(CoreError::InvalidConfig("x".into()));
        assert!(result.is_err());
    }

    #[test]
    fn error_is_debug() {
        let err = CoreError::UnknownStrategy("x".into());
        assert!(format!("{:?}", err).contains("UnknownStrategy"));
    }
}
