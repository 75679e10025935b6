//! Built-in pipeline stages.
//!
//! [`standard_stages`] assembles them in their fixed order:
//!
//! 1. request id
//! 2. security headers
//! 3. rate-limit gate (when a registry is given)
//! 4. metrics (when a collector is given)
//! 5. request logging
//! 6. body size limit
//! 7. panic recovery
//! 8. handler deadline
//! 9. CORS (when enabled)
//!
//! Earlier stages wrap later ones, so a request rejected by the gate still
//! carries its request id and security headers, and is never counted by the
//! metrics stage. An oversized body is refused after logging, so the 413 is
//! logged, counted and rendered like any other error.

use std::sync::Arc;

use gatehouse_core::BucketRegistry;

use crate::config::ServerConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::Interceptor;

pub mod body_limit;
pub mod cors;
pub mod deadline;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod security_headers;

pub use body_limit::BodyLimit;
pub use cors::Cors;
pub use deadline::Deadline;
pub use logging::RequestLogging;
pub use metrics::MetricsCapture;
pub use rate_limit::RateLimitGate;
pub use recovery::Recovery;
pub use request_id::RequestIdStage;
pub use security_headers::SecurityHeaders;

pub fn standard_stages(
    config: &ServerConfig,
    registry: Option<Arc<BucketRegistry>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
) -> anyhow::Result<Vec<Arc<dyn Interceptor>>> {
    let security = if config.hsts_enabled() {
        SecurityHeaders::with_hsts(config.security.hsts_max_age_secs)
    } else {
        SecurityHeaders::new()
    };
    let mut stages: Vec<Arc<dyn Interceptor>> = vec![Arc::new(RequestIdStage), Arc::new(security)];

    if let Some(registry) = registry {
        stages.push(Arc::new(RateLimitGate::new(
            registry,
            config.rate_limit.retry_after_secs,
        )));
    }
    if let Some(collector) = metrics {
        stages.push(Arc::new(MetricsCapture::new(collector)));
    }

    stages.push(Arc::new(RequestLogging));
    stages.push(Arc::new(BodyLimit::new(config.max_body_bytes)));
    stages.push(Arc::new(Recovery));
    stages.push(Arc::new(Deadline::new(config.handler_timeout())));

    if config.cors.enabled {
        stages.push(Arc::new(Cors::new(&config.cors)?));
    }

    Ok(stages)
}
