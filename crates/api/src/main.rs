//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::routes::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Catalog, ExpirySweeper};
use sqlx::postgres::PgPoolOptions;
use store::{InventoryLedger, PostgresStore, ReservationStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_DB_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the expiry sweeper alongside the HTTP server until a shutdown signal arrives.
async fn serve<L, R, C>(
    state: Arc<AppState<L, R, C>>,
    metrics_handle: PrometheusHandle,
    config: &Config,
) -> Result<(), BoxError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + Clone + 'static,
    C: Catalog + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(state.coordinator.store().clone(), config.sweeper_config());
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper_task.await {
        tracing::error!(error = %err, "expiry sweeper task failed");
    }

    served?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Choose storage and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(&url)
                .await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL storage");

            let state =
                api::create_state(store.clone(), store.clone(), store, "postgres", &config);
            serve(state, metrics_handle, &config).await?;
        }
        None => {
            tracing::info!("using in-memory storage");
            let state = api::create_default_state(&config);
            serve(state, metrics_handle, &config).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
