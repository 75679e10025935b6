//! Interceptor chain wrapping the terminal handler.
//!
//! A [`Pipeline`] is an immutable, ordered list of [`Interceptor`]s built once
//! at startup. Each interceptor receives the request context, the request and
//! a [`Next`] continuation; it may call `next.run` (pass through, optionally
//! editing the response on the way out) or return early. Errors returned by
//! any stage or by the handler are rendered by the pipeline's
//! [`ErrorRenderer`] at the point they surface, so stages further out still
//! see, and may decorate, the error response.
//!
//! [`NextService`] exposes the continuation as a tower [`Service`], so a stage
//! can wrap the rest of the chain in an off-the-shelf `tower-http` layer.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::{Body, Bytes, HttpBody};
use axum::extract::Request;
use axum::response::Response;
use axum::BoxError;
use futures::future::BoxFuture;
use tower::Service;

use crate::context::RequestContext;
use crate::error::{ApiError, ErrorRenderer};

/// The business-side endpoint the pipeline protects.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: RequestContext, req: Request) -> Result<Response, ApiError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ApiError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ApiError>> + Send + 'static,
{
    async fn call(&self, ctx: RequestContext, req: Request) -> Result<Response, ApiError> {
        (self.0)(ctx, req).await
    }
}

/// One stage of the pipeline.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        next: Next<'_>,
    ) -> Result<Response, ApiError>;
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
    errors: ErrorRenderer,
}

impl<'a> Next<'a> {
    /// Runs the remaining stages and the handler, always producing a response.
    pub async fn run(self, ctx: &mut RequestContext, req: Request) -> Response {
        let result = match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    handler: self.handler,
                    errors: self.errors,
                };
                stage.intercept(ctx, req, next).await
            }
            None => self.handler.call(ctx.clone(), req).await,
        };

        match result {
            Ok(response) => response,
            Err(err) => self.errors.render(ctx.request_id(), err),
        }
    }
}

/// The rest of the chain as a one-shot tower [`Service`].
///
/// The first `call` runs the continuation; later calls fail with an internal
/// error. [`is_spent`](NextService::is_spent) tells a stage whether the layer
/// it wrapped around this service let the request through.
pub struct NextService<'a> {
    slot: Option<(&'a mut RequestContext, Next<'a>)>,
}

impl<'a> NextService<'a> {
    pub fn new(ctx: &'a mut RequestContext, next: Next<'a>) -> Self {
        Self {
            slot: Some((ctx, next)),
        }
    }

    pub fn is_spent(&self) -> bool {
        self.slot.is_none()
    }
}

impl<'a, B> Service<axum::http::Request<B>> for NextService<'a>
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response;
    type Error = ApiError;
    type Future = BoxFuture<'a, Result<Response, ApiError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: axum::http::Request<B>) -> Self::Future {
        match self.slot.take() {
            Some((ctx, next)) => {
                let req = req.map(Body::new);
                Box::pin(async move { Ok(next.run(ctx, req).await) })
            }
            None => Box::pin(async { Err(ApiError::internal("pipeline continuation reused")) }),
        }
    }
}

struct PipelineInner {
    stages: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
    errors: ErrorRenderer,
}

/// Immutable interceptor chain plus terminal handler. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Arc<dyn Interceptor>>,
        handler: Arc<dyn Handler>,
        errors: ErrorRenderer,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                stages,
                handler,
                errors,
            }),
        }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.stages.iter().map(|s| s.name()).collect()
    }

    pub fn errors(&self) -> ErrorRenderer {
        self.inner.errors
    }

    /// Runs `req` through every stage and the handler.
    pub async fn handle(&self, mut ctx: RequestContext, req: Request) -> Response {
        let next = Next {
            stages: &self.inner.stages,
            handler: self.inner.handler.as_ref(),
            errors: self.inner.errors,
        };
        next.run(&mut ctx, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    #[derive(Clone, Default)]
    struct Log(Arc<std::sync::Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Tag {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Interceptor for Tag {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn intercept(
            &self,
            ctx: &mut RequestContext,
            req: Request,
            next: Next<'_>,
        ) -> Result<Response, ApiError> {
            self.log.push(format!("in:{}", self.name));
            let mut response = next.run(ctx, req).await;
            self.log.push(format!("out:{}", self.name));
            response
                .headers_mut()
                .append("x-stage", HeaderValue::from_static(self.name));
            Ok(response)
        }
    }

    struct Reject;

    #[async_trait]
    impl Interceptor for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn intercept(
            &self,
            _ctx: &mut RequestContext,
            _req: Request,
            _next: Next<'_>,
        ) -> Result<Response, ApiError> {
            Err(ApiError::unauthorized("no entry"))
        }
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> Arc<dyn Handler> {
        Arc::new(handler_fn(move |_ctx, _req| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("ok".into_response())
            }
        }))
    }

    fn request() -> Request {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn stages_run_in_order_and_unwind_in_reverse() {
        let log = Log::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Tag { name: "a", log: log.clone() }),
                Arc::new(Tag { name: "b", log: log.clone() }),
                Arc::new(Tag { name: "c", log: log.clone() }),
            ],
            counting_handler(Arc::clone(&calls)),
            ErrorRenderer::default(),
        );

        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);

        let response = pipeline.handle(RequestContext::detached(), request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            log.entries(),
            vec!["in:a", "in:b", "in:c", "out:c", "out:b", "out:a"]
        );

        let stages: Vec<_> = response
            .headers()
            .get_all("x-stage")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(stages, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_later_stages_and_handler() {
        let log = Log::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Tag { name: "outer", log: log.clone() }),
                Arc::new(Reject),
                Arc::new(Tag { name: "inner", log: log.clone() }),
            ],
            counting_handler(Arc::clone(&calls)),
            ErrorRenderer::default(),
        );

        let ctx = RequestContext::detached();
        let id = ctx.request_id().clone();
        let response = pipeline.handle(ctx, request()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.entries(), vec!["in:outer", "out:outer"]);
        // outer stages still decorate the normalized error response
        assert_eq!(response.headers()["x-stage"], "outer");
        assert_eq!(response.headers()["x-request-id"], id.as_str());
    }

    struct LayerHost;

    #[async_trait]
    impl Interceptor for LayerHost {
        fn name(&self) -> &'static str {
            "layer_host"
        }

        async fn intercept(
            &self,
            ctx: &mut RequestContext,
            req: Request,
            next: Next<'_>,
        ) -> Result<Response, ApiError> {
            use tower::ServiceExt;

            let mut inner = NextService::new(ctx, next);
            assert!(!inner.is_spent());
            let fut: BoxFuture<'_, _> = Box::pin((&mut inner).oneshot(req));
            let response = fut.await?;
            assert!(inner.is_spent());

            let reused = inner
                .call(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await;
            assert!(matches!(reused, Err(ApiError::Internal { .. })));
            Ok(response)
        }
    }

    #[tokio::test]
    async fn next_service_runs_the_rest_of_the_chain_once() {
        let log = Log::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(LayerHost),
                Arc::new(Tag { name: "inner", log: log.clone() }),
            ],
            counting_handler(Arc::clone(&calls)),
            ErrorRenderer::default(),
        );

        let response = pipeline.handle(RequestContext::detached(), request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.entries(), vec!["in:inner", "out:inner"]);
    }

    #[tokio::test]
    async fn handler_error_is_normalized() {
        let pipeline = Pipeline::new(
            Vec::new(),
            Arc::new(handler_fn(|_ctx, _req| async {
                Err::<Response, _>(ApiError::not_found("user not found"))
            })),
            ErrorRenderer::default(),
        );

        let response = pipeline.handle(RequestContext::detached(), request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handler_sees_the_pipeline_context() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        let pipeline = Pipeline::new(
            Vec::new(),
            Arc::new(handler_fn(move |ctx: RequestContext, _req| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    *seen.lock().unwrap() = Some(ctx.request_id().clone());
                    Ok("ok".into_response())
                }
            })),
            ErrorRenderer::default(),
        );

        let ctx = RequestContext::detached();
        let id = ctx.request_id().clone();
        pipeline.handle(ctx, request()).await;

        assert_eq!(seen.lock().unwrap().as_ref(), Some(&id));
    }
}
