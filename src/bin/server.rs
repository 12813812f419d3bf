// Server binary. CLI shape and startup sequence grounded on the teacher's
// `bin/storage_node.rs::main` (`Cli`/`Commands::Run`, config-path default,
// `axum::Server::bind` with a graceful-shutdown signal future).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use vailix::config::ServerConfig;
use vailix::server::{build_router, spawn_ttl_sweep, AppState};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "vailix.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the report/serve server.
    Run,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    vailix::logging::init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Run) | None => {}
    }

    let config_path = cli.config;
    info!(?config_path, "loading configuration");

    let config = match ServerConfig::load(config_path.exists().then_some(config_path.as_path())) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid host/port");

    let state = Arc::new(AppState::new(config)?);
    spawn_ttl_sweep(state.clone(), Duration::from_secs(3600));

    let app = build_router(state);

    info!(%addr, "vailix server ready to serve requests");
    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    match server.await {
        Ok(_) => {
            info!("server shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("server error: {}", e);
            Err(anyhow::anyhow!("server failed: {}", e))
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("received terminate signal, shutting down gracefully..."),
    }
}
