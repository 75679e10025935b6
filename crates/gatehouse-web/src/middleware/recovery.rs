use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use futures::FutureExt;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Guarded-call boundary around every later stage and the handler.
///
/// A panic downstream becomes an [`ApiError::Internal`] for this request only;
/// the serving task and other requests are unaffected. Panics in stages
/// placed before this one are not caught here.
pub struct Recovery;

#[async_trait]
impl Interceptor for Recovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let request_id = ctx.request_id().clone();

        match AssertUnwindSafe(next.run(ctx, req)).catch_unwind().await {
            Ok(response) => Ok(response),
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                tracing::error!(request_id = %request_id, error = %detail, "panic recovered");
                Err(ApiError::internal(format!("panic: {detail}")))
            }
        }
    }
}
