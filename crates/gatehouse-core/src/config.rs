//! Rate limiter configuration.
//!
//! [`RegistryConfig`] is built once at startup and never mutated afterwards;
//! the registry and the evictor each hold their own copy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default interval between two evictor sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Upper bound accepted for `ttl` and `sweep_interval`.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How a request is mapped to a rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One bucket per source address (`X-Forwarded-For`, else the peer IP).
    #[default]
    Ip,
    /// One bucket per raw `Authorization` header value.
    Token,
    /// A single bucket shared by every caller.
    Global,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Ip => "ip",
            Strategy::Token => "token",
            Strategy::Global => "global",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Strategy::Ip),
            "token" => Ok(Strategy::Token),
            "global" => Ok(Strategy::Global),
            other => Err(CoreError::UnknownStrategy(other.to_string())),
        }
    }
}

/// What the rate gate does with a request whose identity resolves to an empty key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymousPolicy {
    /// All unidentified callers share one bucket.
    #[default]
    Shared,
    /// Unidentified callers bypass the limiter entirely.
    Exempt,
}

/// Immutable settings for the bucket registry and its evictor.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    /// Idle time after which a bucket becomes eligible for eviction.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub strategy: Strategy,
    pub anonymous: AnonymousPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100.0,
            burst: 50,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            strategy: Strategy::Ip,
            anonymous: AnonymousPolicy::Shared,
        }
    }
}

impl RegistryConfig {
    /// Checks the numeric ranges.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        if self.burst == 0 {
            return Err(CoreError::InvalidConfig(
                "burst must be greater than 0".to_string(),
            ));
        }
        check_interval("ttl", self.ttl)?;
        check_interval("sweep_interval", self.sweep_interval)?;
        Ok(())
    }
}

fn check_interval(field: &str, value: Duration) -> CoreResult<()> {
    if value.is_zero() {
        return Err(CoreError::InvalidConfig(format!(
            "{field} must be greater than 0"
        )));
    }
    if value > MAX_INTERVAL {
        return Err(CoreError::InvalidConfig(format!(
            "{field} must not exceed {}s, got {}s",
            MAX_INTERVAL.as_secs(),
            value.as_secs()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RegistryConfig::default().validate().is_ok());
    }

    #[test]
    fn default_matches_documented_values() {
        let config = RegistryConfig::default();
        assert_eq!(config.requests_per_second, 100.0);
        assert_eq!(config.burst, 50);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.strategy, Strategy::Ip);
        assert_eq!(config.anonymous, AnonymousPolicy::Shared);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let config = RegistryConfig {
            requests_per_second: 0.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requests_per_second"));
    }

    #[test]
    fn nan_rate_is_rejected() {
        let config = RegistryConfig {
            requests_per_second: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_burst_is_rejected() {
        let config = RegistryConfig {
            burst: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("burst"));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = RegistryConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("ttl"));
    }

    #[test]
    fn oversized_sweep_interval_is_rejected() {
        let config = RegistryConfig {
            sweep_interval: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sweep_interval"), "{err}");

        let config = RegistryConfig {
            ttl: MAX_INTERVAL + Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_interval_is_accepted() {
        let config = RegistryConfig {
            ttl: MAX_INTERVAL,
            sweep_interval: MAX_INTERVAL,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("IP".parse::<Strategy>().unwrap(), Strategy::Ip);
        assert_eq!(" token ".parse::<Strategy>().unwrap(), Strategy::Token);
        assert_eq!("global".parse::<Strategy>().unwrap(), Strategy::Global);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = "cookie".parse::<Strategy>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownStrategy(ref s) if s == "cookie"));
    }

    #[test]
    fn strategy_deserializes_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: Strategy,
            anonymous: AnonymousPolicy,
        }
        let parsed: Wrapper = toml::from_str("strategy = \"token\"\nanonymous = \"exempt\"").unwrap();
        assert_eq!(parsed.strategy, Strategy::Token);
        assert_eq!(parsed.anonymous, AnonymousPolicy::Exempt);
    }

    #[test]
    fn strategy_display_round_trips_through_from_str() {
        for s in [Strategy::Ip, Strategy::Token, Strategy::Global] {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
    }
}
