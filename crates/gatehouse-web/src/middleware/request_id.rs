use async_trait::async_trait;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;

use crate::context::{RequestContext, REQUEST_ID_HEADER};
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

/// Publishes the context's request id on the request (for the handler) and
/// on every response, error responses included.
pub struct RequestIdStage;

#[async_trait]
impl Interceptor for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        mut req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let id = ctx.request_id().clone();
        let value = HeaderValue::from_str(id.as_str()).ok();

        if let Some(value) = &value {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }
        req.extensions_mut().insert(id);

        let mut response = next.run(ctx, req).await;
        if let Some(value) = value {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        Ok(response)
    }
}
