use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use observa::api::{create_router, metrics::init_metrics};
use observa::cli::{run_command, Cli};
use observa::config::Config;
use observa::engine::spawn_alert_scheduler;
use observa::{build_dispatcher, db, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    // RUST_LOG wins over --log-level, which wins over the config file
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.command.is_some() {
        return run_command(&cli, &config).await;
    }

    serve(config).await
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting observa");

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;
    let pool = db::init(&config.server.data_dir).await?;
    let metrics = init_metrics()?;

    let dispatcher = Arc::new(build_dispatcher(&config, pool.clone())?);
    spawn_alert_scheduler(dispatcher.clone(), pool.clone(), &config.alerts);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, pool, dispatcher).with_metrics(metrics));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received, draining connections");
}
