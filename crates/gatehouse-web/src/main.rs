use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse_web::{shutdown_signal, NotFound, Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;

    let default_filter = if config.debug {
        "gatehouse_web=debug,gatehouse_core=debug"
    } else {
        "gatehouse_web=info,gatehouse_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let report = Server::new(config, NotFound)
        .run(shutdown_signal())
        .await?;

    if report.forced {
        tracing::warn!("shutdown forced after {:?}", report.drained_in);
    }
    Ok(())
}
