//! Gatehouse HTTP layer: the admission pipeline around a business handler and
//! the server lifecycle that hosts it.
//!
//! A request enters through [`server::router`], gets a fresh
//! [`RequestContext`], and runs through the fixed stage order built by
//! [`middleware::standard_stages`] before reaching the [`Handler`].

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod server;
pub mod system;

pub use config::ServerConfig;
pub use context::{RequestContext, RequestId, REQUEST_ID_HEADER};
pub use error::{ApiError, ErrorBody, ErrorRenderer};
pub use metrics::{MetricsCollector, PrometheusMetrics, RouteLabel};
pub use pipeline::{handler_fn, Handler, Interceptor, Next, NextService, Pipeline};
pub use server::{
    shutdown_signal, BodyTimeouts, LifecycleState, RunningServer, Server, ShutdownReport,
};
pub use system::{HealthCheck, NotFound};
