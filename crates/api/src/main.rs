//! API server entry point.

use std::error::Error;

use api::config::Config;
use event_store::postgres::run_migrations;
use event_store::{
    EventStore, HistoryStore, InMemoryEventStore, InMemoryHistoryStore, PostgresEventStore,
    PostgresHistoryStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

/// Restores buffered work from the stores and serves until shutdown.
async fn serve<E, H>(
    config: Config,
    events: E,
    histories: H,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let state = api::create_default_state(events, histories, &config);

    let summary = state.dispatcher.restore().await?;
    tracing::info!(
        objects = summary.objects,
        resumed = summary.resumed,
        "pipeline state restored"
    );

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    match config.database_url.clone() {
        Some(url) => {
            tracing::info!("using PostgreSQL stores");
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            run_migrations(&pool).await?;
            serve(
                config,
                PostgresEventStore::new(pool.clone()),
                PostgresHistoryStore::new(pool),
                metrics_handle,
            )
            .await
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            serve(
                config,
                InMemoryEventStore::new(),
                InMemoryHistoryStore::new(),
                metrics_handle,
            )
            .await
        }
    }
}
