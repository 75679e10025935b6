use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use tokio::time::Instant;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::metrics::{MetricsCollector, RequestSample, RouteLabel, UNLABELLED_ROUTE, UNMATCHED_ROUTE};
use crate::pipeline::{Interceptor, Next};

/// Feeds method, route, status and latency of every admitted request to the collector.
///
/// The raw request path is never used as a label; see [`route_of`].
pub struct MetricsCapture {
    collector: Arc<dyn MetricsCollector>,
}

impl MetricsCapture {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self { collector }
    }
}

fn route_of(response: &Response) -> &'static str {
    if let Some(&RouteLabel(route)) = response.extensions().get::<RouteLabel>() {
        return route;
    }
    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => UNMATCHED_ROUTE,
        _ => UNLABELLED_ROUTE,
    }
}

#[async_trait]
impl Interceptor for MetricsCapture {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let method = req.method().clone();
        let start = Instant::now();

        let response = next.run(ctx, req).await;

        self.collector.record(&RequestSample {
            method: &method,
            route: route_of(&response),
            status: response.status().as_u16(),
            duration: start.elapsed(),
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Method;
    use axum::response::IntoResponse;

    use crate::error::ErrorRenderer;
    use crate::metrics::PrometheusMetrics;
    use crate::pipeline::{handler_fn, Pipeline};

    fn pipeline(metrics: Arc<PrometheusMetrics>) -> Pipeline {
        Pipeline::new(
            vec![Arc::new(MetricsCapture::new(metrics))],
            Arc::new(handler_fn(|_ctx, req: Request| async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                match req.uri().path() {
                    "/users" => {
                        let mut response = "ok".into_response();
                        response.extensions_mut().insert(RouteLabel("/users"));
                        Ok(response)
                    }
                    "/plain" => Ok("plain".into_response()),
                    _ => Err(ApiError::not_found("missing")),
                }
            })),
            ErrorRenderer::default(),
        )
    }

    async fn get(pipeline: &Pipeline, path: &str) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        pipeline.handle(RequestContext::detached(), req).await;
    }

    #[tokio::test(start_paused = true)]
    async fn records_route_status_and_duration() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let pipeline = pipeline(Arc::clone(&metrics));

        get(&pipeline, "/users").await;
        get(&pipeline, "/users").await;
        get(&pipeline, "/plain").await;
        get(&pipeline, "/missing").await;

        assert_eq!(metrics.request_count(&Method::GET, "/users", 200), 2);
        assert_eq!(metrics.request_count(&Method::GET, UNLABELLED_ROUTE, 200), 1);
        assert_eq!(metrics.request_count(&Method::GET, UNMATCHED_ROUTE, 404), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"http_request_duration_seconds_bucket{method="GET",path="/users",le="0.5"} 2"#
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_unknown_paths_share_one_series() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let pipeline = pipeline(Arc::clone(&metrics));

        for i in 0..1_000 {
            get(&pipeline, &format!("/scan/{i}")).await;
        }

        assert_eq!(metrics.request_count(&Method::GET, UNMATCHED_ROUTE, 404), 1_000);
        let text = metrics.render().unwrap();
        let series = text
            .lines()
            .filter(|line| line.starts_with("http_requests_total{"))
            .count();
        assert_eq!(series, 1);
        assert!(!text.contains("/scan/"));
    }
}
