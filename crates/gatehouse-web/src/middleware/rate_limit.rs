use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::AUTHORIZATION;
use axum::response::Response;

use gatehouse_core::{identity, AnonymousPolicy, BucketRegistry, ClientMeta, Strategy, ANONYMOUS_KEY};

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

const FORWARDED_FOR: &str = "x-forwarded-for";

fn client_meta(req: &Request) -> ClientMeta<'_> {
    let headers = req.headers();
    ClientMeta {
        forwarded_for: headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()),
        remote_ip: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip()),
        credential: headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
    }
}

/// Admission gate: consumes one token from the caller's bucket or rejects
/// the request before any later stage or the handler runs.
pub struct RateLimitGate {
    registry: Arc<BucketRegistry>,
    retry_after_secs: u64,
}

impl RateLimitGate {
    pub fn new(registry: Arc<BucketRegistry>, retry_after_secs: u64) -> Self {
        Self {
            registry,
            retry_after_secs,
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitGate {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let config = self.registry.config();
        let mut key = identity::resolve(config.strategy, &client_meta(&req));

        if key.is_empty() {
            match config.anonymous {
                AnonymousPolicy::Exempt => return Ok(next.run(ctx, req).await),
                AnonymousPolicy::Shared => key = ANONYMOUS_KEY.to_string(),
            }
        }

        let bucket = self.registry.acquire(&key);
        if !bucket.allow() {
            // Credentials never reach the logs.
            let client = match config.strategy {
                Strategy::Token if key != ANONYMOUS_KEY => "<credential>",
                _ => key.as_str(),
            };
            tracing::warn!(
                request_id = %ctx.request_id(),
                client_id = client,
                strategy = %config.strategy,
                path = req.uri().path(),
                "rate limit exceeded"
            );
            return Err(ApiError::AdmissionDenied {
                retry_after_secs: self.retry_after_secs,
            });
        }

        Ok(next.run(ctx, req).await)
    }
}
