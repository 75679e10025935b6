use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use axum::response::Response;
use tokio::time::Instant;
use tracing::Instrument;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

/// One structured line per request, plus a span carrying the request id
/// around everything downstream so correlated log lines share it.
pub struct RequestLogging;

#[async_trait]
impl Interceptor for RequestLogging {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.to_string())
            .unwrap_or_default();
        let request_id = ctx.request_id().clone();
        let span = tracing::info_span!("request", request_id = %request_id);
        let start = Instant::now();

        let response = next.run(ctx, req).instrument(span).await;

        tracing::info!(
            method = %method,
            path = %path,
            remote_addr = %remote_addr,
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            request_id = %request_id,
            "request processed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use crate::error::ErrorRenderer;
    use crate::pipeline::{handler_fn, Pipeline};

    #[tokio::test]
    async fn passes_response_through_unchanged() {
        let pipeline = Pipeline::new(
            vec![Arc::new(RequestLogging)],
            Arc::new(handler_fn(|_ctx, _req| async {
                Ok((StatusCode::CREATED, "made").into_response())
            })),
            ErrorRenderer::default(),
        );

        let response = pipeline
            .handle(
                RequestContext::detached(),
                Request::builder().uri("/things").body(Body::empty()).unwrap(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
