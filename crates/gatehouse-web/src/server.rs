//! Server lifecycle: `Created → Starting → Running → ShuttingDown → Stopped`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::timeout::{RequestBodyTimeoutLayer, ResponseBodyTimeoutLayer};

use gatehouse_core::{deadline_after, evictor, BucketRegistry, EvictorHandle};

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::error::{ApiError, ErrorRenderer};
use crate::metrics::{MetricsCollector, PrometheusMetrics};
use crate::middleware::standard_stages;
use crate::pipeline::{Handler, Pipeline};
use crate::system::{HealthCheck, HealthRegistry, SystemEndpoints};

/// How long a forced shutdown waits for aborted requests and connections.
const FORCE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `true` when in-flight requests were still running at the shutdown deadline.
    pub forced: bool,
    pub drained_in: Duration,
}

/// Axum state for the single catch-all route.
#[derive(Clone)]
struct Dispatcher {
    pipeline: Pipeline,
    tracker: TaskTracker,
    abort: CancellationToken,
}

/// Runs every request on its own tracked task so shutdown can wait for it.
async fn dispatch(State(dispatcher): State<Dispatcher>, req: Request) -> Response {
    let ctx = RequestContext::new(dispatcher.abort.child_token());
    let request_id = ctx.request_id().clone();
    let pipeline = dispatcher.pipeline.clone();

    let task = dispatcher
        .tracker
        .spawn(async move { pipeline.handle(ctx, req).await });

    match task.await {
        Ok(response) => response,
        Err(e) => dispatcher
            .pipeline
            .errors()
            .render(&request_id, ApiError::internal(format!("request task failed: {e}"))),
    }
}

/// Idle limits on request and response bodies, applied outside the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct BodyTimeouts {
    pub read: Duration,
    pub write: Duration,
}

impl BodyTimeouts {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read: config.read_timeout(),
            write: config.write_timeout(),
        }
    }
}

/// Axum router feeding every request, whatever its path or method, into `pipeline`.
///
/// A body that stalls longer than `timeouts.read` fails while the handler
/// reads it; a response body that stalls longer than `timeouts.write` ends
/// the connection.
pub fn router(
    pipeline: Pipeline,
    tracker: TaskTracker,
    abort: CancellationToken,
    timeouts: BodyTimeouts,
) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Dispatcher {
            pipeline,
            tracker,
            abort,
        })
        .layer(RequestBodyTimeoutLayer::new(timeouts.read))
        .layer(ResponseBodyTimeoutLayer::new(timeouts.write))
}

/// A configured server that has not started yet.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    health: HealthRegistry,
    metrics: Option<Arc<dyn MetricsCollector>>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: impl Handler) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            config,
            handler: Arc::new(handler),
            health: HealthRegistry::new(),
            metrics: None,
            state: Arc::new(state),
        }
    }

    pub fn with_health_check(mut self, check: impl HealthCheck) -> Self {
        self.health.register(Arc::new(check));
        self
    }

    /// Replaces the default Prometheus collector. Ignored when metrics are disabled.
    pub fn with_metrics(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Builds the pipeline, binds the listener and launches the evictor.
    ///
    /// Any failure, including a bind error, leaves the server `Stopped`
    /// without ever reaching `Running`.
    pub async fn start(self) -> anyhow::Result<RunningServer> {
        let state = Arc::clone(&self.state);
        state.send_replace(LifecycleState::Starting);

        match self.launch().await {
            Ok(running) => {
                state.send_replace(LifecycleState::Running);
                Ok(running)
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "server failed to start");
                state.send_replace(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    /// Starts, serves until `signal` resolves, then shuts down.
    pub async fn run(self, signal: impl Future<Output = ()>) -> anyhow::Result<ShutdownReport> {
        self.start().await?.run_until(signal).await
    }

    async fn launch(self) -> anyhow::Result<RunningServer> {
        let config = self.config;
        config.validate()?;
        for warning in config.warnings() {
            tracing::warn!("{warning}");
        }

        let registry = config
            .rate_limit
            .enabled
            .then(|| Arc::new(BucketRegistry::new(config.rate_limit.registry_config())));
        let metrics: Option<Arc<dyn MetricsCollector>> = match (config.metrics_enabled, self.metrics) {
            (false, _) => None,
            (true, Some(collector)) => Some(collector),
            (true, None) => Some(Arc::new(
                PrometheusMetrics::new().context("failed to register metrics")?,
            )),
        };

        let stages = standard_stages(&config, registry.clone(), metrics.clone())?;
        let endpoints = SystemEndpoints::new(self.health, metrics.clone(), self.handler);
        let pipeline = Pipeline::new(stages, Arc::new(endpoints), ErrorRenderer::new(config.debug));
        tracing::debug!(stages = ?pipeline.stage_names(), "pipeline installed");

        let rustls = match (&config.tls.cert_path, &config.tls.key_path) {
            (Some(cert), Some(key)) => Some(
                axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                    .await
                    .with_context(|| format!("failed to load TLS certificate {}", cert.display()))?,
            ),
            _ => None,
        };

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        let evictor = registry.as_ref().map(|registry| {
            evictor::spawn(
                Arc::clone(registry),
                config.rate_limit.registry_config().sweep_interval,
            )
        });

        let tracker = TaskTracker::new();
        let abort = CancellationToken::new();
        let graceful = CancellationToken::new();

        let app = router(
            pipeline,
            tracker.clone(),
            abort.clone(),
            BodyTimeouts::from_config(&config),
        );
        let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

        let server_task = match rustls {
            Some(rustls) => {
                let listener = listener
                    .into_std()
                    .context("failed to hand listener to TLS server")?;
                let handle = axum_server::Handle::new();
                let on_shutdown = handle.clone();
                let stop = graceful.clone();
                tokio::spawn(async move {
                    stop.cancelled().await;
                    on_shutdown.graceful_shutdown(None);
                });

                let serve = axum_server::from_tcp_rustls(listener, rustls)
                    .handle(handle)
                    .serve(make_service);
                tracing::info!("gatehouse listening on https://{}", local_addr);
                tokio::spawn(serve)
            }
            None => {
                let serve = axum::serve(listener, make_service)
                    .with_graceful_shutdown(graceful.clone().cancelled_owned());
                tracing::info!("gatehouse listening on http://{}", local_addr);
                tokio::spawn(async move { serve.await })
            }
        };

        Ok(RunningServer {
            local_addr,
            state: self.state,
            registry,
            metrics,
            tracker,
            graceful,
            abort,
            evictor,
            server_task,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }
}

/// Handle to a server in the `Running` state.
pub struct RunningServer {
    local_addr: SocketAddr,
    state: Arc<watch::Sender<LifecycleState>>,
    registry: Option<Arc<BucketRegistry>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    tracker: TaskTracker,
    graceful: CancellationToken,
    abort: CancellationToken,
    evictor: Option<EvictorHandle>,
    server_task: JoinHandle<std::io::Result<()>>,
    shutdown_timeout: Duration,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Requests currently inside the pipeline.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn registry(&self) -> Option<&Arc<BucketRegistry>> {
        self.registry.as_ref()
    }

    pub fn metrics(&self) -> Option<&Arc<dyn MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Serves until `signal` resolves, then shuts down.
    ///
    /// Fails if the accept loop exits on its own before the signal.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> anyhow::Result<ShutdownReport> {
        let exited = tokio::select! {
            _ = signal => None,
            joined = &mut self.server_task => Some(joined),
        };

        let Some(joined) = exited else {
            tracing::info!("shutdown signal received");
            return Ok(self.shutdown().await);
        };

        if let Some(evictor) = self.evictor.take() {
            evictor.stop().await;
        }
        self.state.send_replace(LifecycleState::Stopped);
        match joined {
            Ok(Ok(())) => anyhow::bail!("server exited unexpectedly"),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("server task failed")),
        }
    }

    /// Stops accepting connections and the evictor, then waits up to the
    /// shutdown timeout for in-flight requests before aborting them.
    pub async fn shutdown(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = deadline_after(started, self.shutdown_timeout);

        self.state.send_replace(LifecycleState::ShuttingDown);
        tracing::info!(
            in_flight = self.tracker.len(),
            timeout_secs = self.shutdown_timeout.as_secs(),
            "shutting down"
        );

        self.graceful.cancel();
        if let Some(evictor) = self.evictor {
            evictor.stop().await;
        }
        self.tracker.close();

        let mut server_task = self.server_task;
        let mut joined = None;
        if tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok()
        {
            // requests are done; connections still flush their last responses
            if let Ok(result) = tokio::time::timeout_at(deadline, &mut server_task).await {
                joined = Some(result);
            }
        }

        let forced = joined.is_none();
        if forced {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "shutdown timeout elapsed, aborting remaining requests"
            );
            self.abort.cancel();
            let _ = tokio::time::timeout(FORCE_GRACE, self.tracker.wait()).await;
            joined = Some(match tokio::time::timeout(FORCE_GRACE, &mut server_task).await {
                Ok(result) => result,
                Err(_) => {
                    server_task.abort();
                    server_task.await
                }
            });
        }

        if let Some(result) = joined {
            log_server_exit(result);
        }

        let report = ShutdownReport {
            forced,
            drained_in: started.elapsed(),
        };
        self.state.send_replace(LifecycleState::Stopped);
        tracing::info!(
            forced = report.forced,
            drained_ms = report.drained_in.as_millis() as u64,
            "server stopped"
        );
        report
    }
}

fn log_server_exit(result: Result<std::io::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "server exited with error"),
        Err(e) if e.is_cancelled() => tracing::debug!("server task aborted"),
        Err(e) => tracing::error!(error = %e, "server task panicked"),
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
