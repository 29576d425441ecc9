//! HTTP ingress for the ordered event pipeline.
//!
//! Accepts new event versions and downstream signals, exposes per-object
//! histories for inspection, and serves health and Prometheus metrics. All
//! ordering work is delegated to the [`sequencer::Dispatcher`].

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::{EventStore, HistoryStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sequencer::{Dispatcher, InMemoryPublishService, InMemoryTransformService};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<E, H>(state: Arc<AppState<E, H>>, metrics_handle: PrometheusHandle) -> Router
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<E, H>))
        .route("/events", post(routes::events::ingest::<E, H>))
        .route(
            "/objects/{object_id}/versions/{version}/ack",
            post(routes::objects::ack::<E, H>),
        )
        .route(
            "/objects/{object_id}/versions/{version}/processed",
            post(routes::objects::processed::<E, H>),
        )
        .route(
            "/objects/{object_id}/versions/{version}/replay",
            post(routes::objects::replay::<E, H>),
        )
        .route(
            "/objects/{object_id}/history",
            get(routes::objects::history::<E, H>),
        )
        .route(
            "/objects/{object_id}/events",
            get(routes::objects::events::<E, H>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires a dispatcher over the given stores to simulated collaborators
/// configured from `config`.
pub fn create_default_state<E, H>(events: E, histories: H, config: &Config) -> Arc<AppState<E, H>>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let transform = InMemoryTransformService::new()
        .with_delay(config.transform_delay)
        .with_record_limit(config.record_limit);
    let publish = InMemoryPublishService::new()
        .with_delay(config.publish_delay)
        .with_record_limit(config.record_limit);

    let dispatcher = Dispatcher::new(
        events,
        histories,
        transform.clone(),
        publish.clone(),
        config.sequencer_config(),
    );

    Arc::new(AppState {
        dispatcher,
        transform,
        publish,
    })
}
