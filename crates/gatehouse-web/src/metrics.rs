//! Request metrics collection.
//!
//! The collector is created once at startup, handed to the metrics stage and
//! the `/metrics` endpoint, and lives until the process exits.

use std::time::Duration;

use anyhow::Context;
use axum::http::Method;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// `path` label for responses no route claimed (404 / 405).
pub const UNMATCHED_ROUTE: &str = "<unmatched>";
/// `path` label for responses whose handler did not attach a [`RouteLabel`].
pub const UNLABELLED_ROUTE: &str = "<unlabelled>";

/// Route template (e.g. `/users/{id}`) attached to a response as an
/// extension. It becomes the `path` label, so it must come from a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLabel(pub &'static str);

/// One completed request as seen by the metrics stage.
#[derive(Debug, Clone, Copy)]
pub struct RequestSample<'a> {
    pub method: &'a Method,
    /// Already bounded: a [`RouteLabel`] or one of the fallback constants.
    pub route: &'a str,
    pub status: u16,
    pub duration: Duration,
}

/// Observer receiving one sample per request.
pub trait MetricsCollector: Send + Sync + 'static {
    fn record(&self, sample: &RequestSample<'_>);

    /// Exposition of everything recorded so far.
    fn render(&self) -> anyhow::Result<String>;

    fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

/// Maps extension methods to `OTHER` so the label set stays fixed.
pub fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}

/// `http_requests_total` and `http_request_duration_seconds` in a Prometheus registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Registers the request metrics in an existing registry.
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Requests admitted past the rate gate"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Time from admission to response",
            ),
            &["method", "path"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current value of one `http_requests_total` series.
    pub fn request_count(&self, method: &Method, route: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.requests
            .get_metric_with_label_values(&[method_label(method), route, status.as_str()])
            .map(|counter| counter.get())
            .unwrap_or(0)
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn record(&self, sample: &RequestSample<'_>) {
        let method = method_label(sample.method);
        let status = sample.status.to_string();
        self.requests
            .with_label_values(&[method, sample.route, status.as_str()])
            .inc();
        self.duration
            .with_label_values(&[method, sample.route])
            .observe(sample.duration.as_secs_f64());
    }

    fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics exposition is not utf-8")
    }
}
