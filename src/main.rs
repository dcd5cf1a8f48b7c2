use std::sync::Arc;

use tick_dashboard::{
    api::router::create_router,
    config::Config,
    db,
    market::{repository::KustoTickRepository, service::MarketService},
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.app_env.default_log_level()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Kusto client handle; tokens are resolved on first query
    let kusto = db::kusto::connect(&config)?;
    info!(
        cluster = %config.kusto_cluster,
        database = %config.kusto_database,
        table = %config.kusto_table,
        "Kusto client ready"
    );

    let repository = KustoTickRepository::new(kusto, config.kusto_table.clone());
    let market_service = MarketService::new(
        Arc::new(repository),
        config.default_symbol.clone(),
        config.max_hours,
    );

    // Build our application with routes
    let app = create_router(market_service);

    // Run our application
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
}
