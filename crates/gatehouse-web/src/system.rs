//! `/health` and `/metrics` endpoints served in front of the application handler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::metrics::{MetricsCollector, RouteLabel};
use crate::pipeline::Handler;

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

/// Upper bound for one round of health checks.
const HEALTH_CHECK_BUDGET: Duration = Duration::from_secs(5);

/// A named dependency check contributing to `/health`.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn check(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "OK"
    }
}

#[derive(Default, Clone)]
pub struct HealthRegistry {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: Arc<dyn HealthCheck>) {
        self.checks.push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs every check concurrently within a shared budget.
    pub async fn run(&self) -> HealthReport {
        self.run_within(HEALTH_CHECK_BUDGET).await
    }

    async fn run_within(&self, budget: Duration) -> HealthReport {
        let pending = self.checks.iter().map(|check| {
            let check = Arc::clone(check);
            async move {
                let outcome = match tokio::time::timeout(budget, check.check()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(_) => Err(format!("timed out after {}s", budget.as_secs())),
                };
                (check, outcome)
            }
        });

        let mut healthy = true;
        let mut checks = BTreeMap::new();
        for (check, outcome) in futures::future::join_all(pending).await {
            let description = Some(check.description().to_string()).filter(|d| !d.is_empty());
            let result = match outcome {
                Ok(()) => CheckResult {
                    status: "OK".to_string(),
                    description,
                    error: None,
                },
                Err(error) => {
                    healthy = false;
                    tracing::warn!(check = check.name(), error = %error, "health check failed");
                    CheckResult {
                        status: "ERROR".to_string(),
                        description,
                        error: Some(error),
                    }
                }
            };
            checks.insert(check.name().to_string(), result);
        }

        HealthReport {
            status: if healthy { "OK" } else { "ERROR" }.to_string(),
            checks,
        }
    }
}

/// Terminal handler that serves the system endpoints and forwards
/// everything else to the application handler.
pub struct SystemEndpoints {
    health: HealthRegistry,
    metrics: Option<Arc<dyn MetricsCollector>>,
    inner: Arc<dyn Handler>,
}

impl SystemEndpoints {
    pub fn new(
        health: HealthRegistry,
        metrics: Option<Arc<dyn MetricsCollector>>,
        inner: Arc<dyn Handler>,
    ) -> Self {
        Self {
            health,
            metrics,
            inner,
        }
    }
}

#[async_trait]
impl Handler for SystemEndpoints {
    async fn call(&self, ctx: RequestContext, req: Request) -> Result<Response, ApiError> {
        if req.method() == Method::GET {
            match req.uri().path() {
                HEALTH_PATH => {
                    let report = self.health.run().await;
                    let status = if report.is_healthy() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    let mut response = (status, Json(report)).into_response();
                    response.extensions_mut().insert(RouteLabel(HEALTH_PATH));
                    return Ok(response);
                }
                METRICS_PATH => {
                    if let Some(metrics) = &self.metrics {
                        let mut response = metrics.render()?.into_response();
                        response.headers_mut().insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static(metrics.content_type()),
                        );
                        response.extensions_mut().insert(RouteLabel(METRICS_PATH));
                        return Ok(response);
                    }
                }
                _ => {}
            }
        }
        self.inner.call(ctx, req).await
    }
}

/// Application handler used when none is supplied.
pub struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn call(&self, _ctx: RequestContext, req: Request) -> Result<Response, ApiError> {
        Err(ApiError::not_found(format!("no route for {}", req.uri().path())))
    }
}
