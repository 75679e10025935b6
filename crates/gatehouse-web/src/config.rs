use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use gatehouse_core::{AnonymousPolicy, RegistryConfig, Strategy};

/// Upper bound for every `*_timeout_secs` setting (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Exposes failure details in error bodies and raises the default log level.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Longest wait for the next chunk of a request body.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Longest wait for the client to accept the next chunk of a response body.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// PEM certificate chain and private key. TLS is on when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Sends `Strict-Transport-Security`; only honoured when TLS is enabled.
    #[serde(default = "default_true")]
    pub hsts: bool,
    #[serde(default = "default_hsts_max_age_secs")]
    pub hsts_max_age_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hsts: true,
            hsts_max_age_secs: default_hsts_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub anonymous: AnonymousPolicy,
    /// Value of the `Retry-After` header on denied requests.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            strategy: Strategy::default(),
            anonymous: AnonymousPolicy::default(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            requests_per_second: self.requests_per_second,
            burst: self.burst,
            ttl: Duration::from_secs(self.ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            strategy: self.strategy,
            anonymous: self.anonymous,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "default_cors_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: default_cors_max_age_secs(),
        }
    }
}

fn default_true() -> bool { true }
fn default_handler_timeout_secs() -> u64 { 30 }
fn default_shutdown_timeout_secs() -> u64 { 10 }
fn default_read_timeout_secs() -> u64 { 5 }
fn default_write_timeout_secs() -> u64 { 10 }
fn default_hsts_max_age_secs() -> u64 { 63_072_000 }
fn default_max_body_bytes() -> usize { 1024 * 1024 }
fn default_requests_per_second() -> f64 { 100.0 }
fn default_burst() -> u32 { 50 }
fn default_ttl_secs() -> u64 { 60 * 60 }
fn default_sweep_interval_secs() -> u64 { 10 * 60 }
fn default_retry_after_secs() -> u64 { 60 }
fn default_cors_max_age_secs() -> u64 { 300 }

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS", "HEAD"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-Requested-With"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            debug: false,
            handler_timeout_secs: default_handler_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            metrics_enabled: true,
            tls: TlsConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}")),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ServerConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Whether `Strict-Transport-Security` is sent; never over plain HTTP.
    pub fn hsts_enabled(&self) -> bool {
        self.security.hsts && self.tls.enabled()
    }

    /// Reads `$GATEHOUSE_CONFIG` (if set), applies environment overrides and validates.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("GATEHOUSE_CONFIG").map(PathBuf::from).ok();

        let mut config = match config_path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&contents)?
            }
            None => ServerConfig::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("failed to parse config")
    }

    /// Overrides fields from `GATEHOUSE_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(addr) = parse_env(&lookup, "GATEHOUSE_BIND_ADDR")? {
            self.bind_addr = addr;
        }
        if let Some(debug) = parse_env(&lookup, "GATEHOUSE_DEBUG")? {
            self.debug = debug;
        }
        if let Some(secs) = parse_env(&lookup, "GATEHOUSE_HANDLER_TIMEOUT_SECS")? {
            self.handler_timeout_secs = secs;
        }
        if let Some(secs) = parse_env(&lookup, "GATEHOUSE_SHUTDOWN_TIMEOUT_SECS")? {
            self.shutdown_timeout_secs = secs;
        }
        if let Some(secs) = parse_env(&lookup, "GATEHOUSE_READ_TIMEOUT_SECS")? {
            self.read_timeout_secs = secs;
        }
        if let Some(secs) = parse_env(&lookup, "GATEHOUSE_WRITE_TIMEOUT_SECS")? {
            self.write_timeout_secs = secs;
        }
        if let Some(enabled) = parse_env(&lookup, "GATEHOUSE_METRICS_ENABLED")? {
            self.metrics_enabled = enabled;
        }
        if let Some(path) = lookup("GATEHOUSE_TLS_CERT_PATH") {
            self.tls.cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("GATEHOUSE_TLS_KEY_PATH") {
            self.tls.key_path = Some(PathBuf::from(path));
        }

        if let Some(enabled) = parse_env(&lookup, "GATEHOUSE_RATE_LIMIT_ENABLED")? {
            self.rate_limit.enabled = enabled;
        }
        if let Some(rps) = parse_env(&lookup, "GATEHOUSE_RATE_LIMIT_RPS")? {
            self.rate_limit.requests_per_second = rps;
        }
        if let Some(burst) = parse_env(&lookup, "GATEHOUSE_RATE_LIMIT_BURST")? {
            self.rate_limit.burst = burst;
        }
        if let Some(ttl) = parse_env(&lookup, "GATEHOUSE_RATE_LIMIT_TTL_SECS")? {
            self.rate_limit.ttl_secs = ttl;
        }
        if let Some(strategy) = parse_env(&lookup, "GATEHOUSE_RATE_LIMIT_STRATEGY")? {
            self.rate_limit.strategy = strategy;
        }

        if let Some(enabled) = parse_env(&lookup, "GATEHOUSE_CORS_ENABLED")? {
            self.cors.enabled = enabled;
        }
        if let Some(origins) = lookup("GATEHOUSE_CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = split_list(&origins);
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (field, secs) in [
            ("handler_timeout_secs", self.handler_timeout_secs),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{field} must be greater than 0");
            }
            if secs > MAX_TIMEOUT_SECS {
                anyhow::bail!("{field} must not exceed {MAX_TIMEOUT_SECS}, got {secs}");
            }
        }
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            anyhow::bail!("tls.cert_path and tls.key_path must be set together");
        }
        if self.rate_limit.enabled {
            self.rate_limit.registry_config().validate()?;
        }
        Ok(())
    }

    /// Settings that are valid but probably not what the operator wants.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.rate_limit.exempts_anonymous() {
            warnings.push(
                "rate_limit.anonymous = \"exempt\": callers without an identity are not rate limited"
                    .to_string(),
            );
        }
        warnings
    }
}

impl RateLimitConfig {
    fn exempts_anonymous(&self) -> bool {
        self.enabled && self.strategy != Strategy::Global && self.anonymous == AnonymousPolicy::Exempt
    }
}
