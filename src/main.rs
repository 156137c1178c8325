use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webshell_api::config::ServiceConfig;
use webshell_api::http::{router, AppState};
use webshell_api::identity::CtfdClient;
use webshell_api::manager::WebshellManager;
use webshell_api::reclaim::spawn_reclaimer;
use webshell_api::runtime::{ContainerRuntime, DockerRuntime};

#[derive(Debug, Parser)]
#[command(
    name = "webshell-api",
    about = "Per-team webshell container provisioning API",
    version
)]
struct Cli {
    /// TOML config file; the environment is used when absent.
    #[arg(long, env = "WEBSHELL_API_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webshell_api=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServiceConfig::from_env().context("loading config from environment")?,
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    let runtime = Arc::new(DockerRuntime::connect()?);
    runtime
        .ensure_network(&config.network_name)
        .await
        .context("preparing webshell network")?;

    let manager = Arc::new(WebshellManager::new(runtime, &config)?);
    let identity = Arc::new(CtfdClient::new(&config.ctfd_url)?);

    if let Some(interval) = config.cleanup_interval() {
        spawn_reclaimer(manager.clone(), interval);
    }

    let state = Arc::new(AppState {
        manager,
        identity,
        api_secret: config.api_secret.clone(),
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %addr,
        ctfd = %config.ctfd_url,
        image = %config.image,
        network = %config.network_name,
        "webshell api listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
