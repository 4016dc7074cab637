use service_core::observability::init_tracing;
use sports_data_api::config::AppConfig;
use sports_data_api::services::metrics::init_metrics;
use sports_data_api::startup::Application;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_tracing(
        "sports-data-api",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // Must run before any metrics are recorded
    init_metrics().map_err(|e| {
        tracing::error!("Failed to install Prometheus recorder: {}", e);
        std::io::Error::other(format!("Metrics initialization error: {}", e))
    })?;

    tracing::info!(
        environment = %config.environment,
        version = config.version.as_deref().unwrap_or(env!("CARGO_PKG_VERSION")),
        "Starting sports-data-api"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_with_graceful_shutdown(shutdown_signal()).await
}
