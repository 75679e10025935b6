use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::{
    HeaderName, HeaderValue, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::response::Response;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next};

/// Set on every response. The policy denies everything: the pipeline fronts
/// an API, never documents.
const HARDENING: [(HeaderName, &str); 5] = [
    (X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (X_FRAME_OPTIONS, "DENY"),
    (X_XSS_PROTECTION, "1; mode=block"),
    (REFERRER_POLICY, "strict-origin-when-cross-origin"),
    (CONTENT_SECURITY_POLICY, "default-src 'none'; frame-ancestors 'none'"),
];

/// Adds the hardening headers, plus `Strict-Transport-Security` when built
/// with a max-age.
pub struct SecurityHeaders {
    hsts: Option<HeaderValue>,
}

impl SecurityHeaders {
    pub fn new() -> Self {
        Self { hsts: None }
    }

    pub fn with_hsts(max_age_secs: u64) -> Self {
        let value = format!("max-age={max_age_secs}; includeSubDomains");
        Self {
            hsts: HeaderValue::from_str(&value).ok(),
        }
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        let mut response = next.run(ctx, req).await;
        let headers = response.headers_mut();
        for (name, value) in HARDENING {
            headers.insert(name, HeaderValue::from_static(value));
        }
        if let Some(hsts) = &self.hsts {
            headers.insert(STRICT_TRANSPORT_SECURITY, hsts.clone());
        }
        Ok(response)
    }
}
