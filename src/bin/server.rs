use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use firewatch::db::connect_store;
use firewatch::server::config::ServerConfig;
use firewatch::services::alert_ingestion::AlertIngestionService;
use firewatch::version::VERSION;
use firewatch::web::create_axum_router;

/// Fire alert ingestion and query server.
#[derive(Parser, Debug)]
#[command(version = VERSION, about)]
struct Args {
    /// Optional TOML config file. Environment variables override its values.
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!(version = VERSION, "Starting firewatch server...");

    let store = connect_store(&config.store_config()).await.map_err(|e| {
        error!(error = %e, "Failed to open alert store.");
        e
    })?;
    let alert_count = store.count().await?;
    info!(alerts = alert_count, "Alert store ready.");

    let ingestion = Arc::new(AlertIngestionService::new(store));
    let listen_address = config.listen_address();
    let app_router = create_axum_router(ingestion, Arc::new(config));

    let listener = tokio::net::TcpListener::bind(&listen_address).await.map_err(|e| {
        error!(address = %listen_address, error = %e, "Failed to bind HTTP listener.");
        e
    })?;
    info!(address = %listen_address, "HTTP server listening.");

    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped.");
    Ok(())
}
