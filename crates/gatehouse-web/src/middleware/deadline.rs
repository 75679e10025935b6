use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use tokio::time::Instant;

use gatehouse_core::deadline_after;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

/// Bounds the time the rest of the chain may spend on a request.
///
/// When the deadline passes first, the request's cancellation token is fired,
/// the downstream future is dropped and the caller gets a 503. The same
/// happens, without firing the token, when the token is cancelled from
/// outside (forced shutdown).
pub struct Deadline {
    timeout: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Interceptor for Deadline {
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let own = deadline_after(Instant::now(), self.timeout);
        ctx.set_deadline(own);
        let deadline = ctx.deadline().unwrap_or(own);
        let cancel = ctx.cancellation().clone();
        let request_id = ctx.request_id().clone();

        tokio::select! {
            biased;
            response = next.run(ctx, req) => Ok(response),
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                tracing::warn!(request_id = %request_id, timeout_ms = self.timeout.as_millis() as u64, "request deadline exceeded");
                Err(ApiError::DeadlineExceeded)
            }
            _ = cancel.cancelled() => Err(ApiError::ShuttingDown),
        }
    }
}
