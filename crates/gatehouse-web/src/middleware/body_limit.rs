use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, ServiceExt};
use tower_http::limit::RequestBodyLimitLayer;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next, NextService};

/// Caps request body size with `tower-http`'s limit layer.
///
/// A declared `Content-Length` over the cap is refused before the handler
/// runs, as a 413 in the standard error envelope. A body without a declared
/// length is wrapped so that reading past the cap fails inside the handler.
pub struct BodyLimit {
    layer: RequestBodyLimitLayer,
}

impl BodyLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            layer: RequestBodyLimitLayer::new(max_bytes),
        }
    }
}

#[async_trait]
impl Interceptor for BodyLimit {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let mut inner = NextService::new(ctx, next);
        let fut: BoxFuture<'_, _> = Box::pin(self.layer.layer(&mut inner).oneshot(req));
        let response = fut.await?;

        if !inner.is_spent() {
            return Err(ApiError::client(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body too large",
            ));
        }
        Ok(response.map(Body::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    use crate::error::ErrorRenderer;
    use crate::pipeline::{handler_fn, Pipeline};

    fn pipeline(max: usize, calls: Arc<AtomicUsize>) -> Pipeline {
        Pipeline::new(
            vec![Arc::new(BodyLimit::new(max))],
            Arc::new(handler_fn(move |_ctx, req: Request| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let bytes = to_bytes(req.into_body(), usize::MAX).await.map_err(|_| {
                        ApiError::client(StatusCode::PAYLOAD_TOO_LARGE, "body exceeded limit")
                    })?;
                    Ok(bytes.len().to_string().into_response())
                }
            })),
            ErrorRenderer::default(),
        )
    }

    fn upload(len: usize, declare_length: bool) -> Request {
        let mut builder = Request::builder().method("POST").uri("/upload");
        if declare_length {
            builder = builder.header("content-length", len.to_string());
        }
        builder.body(Body::from(vec![b'x'; len])).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn small_body_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = pipeline(16, Arc::clone(&calls))
            .handle(RequestContext::detached(), upload(8, true))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"8");
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_with_envelope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = RequestContext::detached();
        let id = ctx.request_id().clone();

        let response = pipeline(16, Arc::clone(&calls))
            .handle(ctx, upload(64, true))
            .await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let body = body_json(response).await;
        assert_eq!(body["code"], 413);
        assert_eq!(body["message"], "request body too large");
        assert_eq!(body["request_id"], id.as_str());
    }

    #[tokio::test]
    async fn undeclared_oversize_fails_while_reading() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = pipeline(16, Arc::clone(&calls))
            .handle(RequestContext::detached(), upload(64, false))
            .await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(body_json(response).await["message"], "body exceeded limit");
    }
}
