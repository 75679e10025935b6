use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::{HeaderName, ACCESS_CONTROL_REQUEST_METHOD};
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsConfig;
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::pipeline::{Interceptor, Next, NextService};

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

fn parse_all<T>(values: &[String], what: &str) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    values
        .iter()
        .map(|v| v.parse::<T>().with_context(|| format!("invalid CORS {what} {v:?}")))
        .collect()
}

fn build_layer(config: &CorsConfig) -> anyhow::Result<CorsLayer> {
    if config.allow_credentials
        && (is_wildcard(&config.allowed_methods)
            || is_wildcard(&config.allowed_headers)
            || is_wildcard(&config.exposed_headers))
    {
        anyhow::bail!("CORS allow_credentials cannot be combined with \"*\" methods or headers");
    }

    // a credentialed response may not carry the `*` origin, so echo it instead
    let origins = match (is_wildcard(&config.allowed_origins), config.allow_credentials) {
        (true, true) => AllowOrigin::mirror_request(),
        (true, false) => AllowOrigin::any(),
        (false, _) => AllowOrigin::list(parse_all::<HeaderValue>(&config.allowed_origins, "origin")?),
    };
    let methods = if is_wildcard(&config.allowed_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(parse_all::<Method>(&config.allowed_methods, "method")?)
    };
    let headers = if is_wildcard(&config.allowed_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&config.allowed_headers, "header")?)
    };
    let exposed = if is_wildcard(&config.exposed_headers) {
        ExposeHeaders::any()
    } else {
        ExposeHeaders::list(parse_all::<HeaderName>(&config.exposed_headers, "exposed header")?)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(exposed)
        .allow_credentials(config.allow_credentials);
    if config.max_age_secs > 0 {
        layer = layer.max_age(Duration::from_secs(config.max_age_secs));
    }
    Ok(layer)
}

/// Cross-origin policy backed by `tower-http`'s [`CorsLayer`].
///
/// Preflights (`OPTIONS` with `Access-Control-Request-Method`) are answered
/// here with 200; any other `OPTIONS` request reaches the handler.
pub struct Cors {
    layer: CorsLayer,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> anyhow::Result<Self> {
        Ok(Self {
            layer: build_layer(config)?,
        })
    }
}

#[async_trait]
impl Interceptor for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError> {
        if req.method() == Method::OPTIONS
            && !req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
        {
            return Ok(next.run(ctx, req).await);
        }

        let mut inner = NextService::new(ctx, next);
        let fut: BoxFuture<'_, _> = Box::pin(self.layer.layer(&mut inner).oneshot(req));
        fut.await
    }
}
