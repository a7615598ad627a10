//! HTTP host for the library reservation workflows.
//!
//! Write endpoints publish messages onto the bus and return `202 Accepted`;
//! a [`SagaRuntime`](saga_engine::SagaRuntime) task consumes the bus and
//! drives the Book and Reservation workflows. Read endpoints load the
//! current instance from the saga store. Structured logging goes through
//! `tracing`, metrics through a Prometheus recorder.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use library::{LibraryMessage, LibraryRuntime};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_engine::{
    ChannelBus, Clock, Message, MessageBus, SagaError, SagaStore, SystemClock, TokioScheduler,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore + Clone> {
    pub library: LibraryRuntime<S>,
    pub bus: Arc<dyn MessageBus<LibraryMessage>>,
    pub clock: Arc<dyn Clock>,
}

impl<S: SagaStore + Clone + 'static> AppState<S> {
    /// Puts a message on the bus for the workflows to pick up.
    pub async fn publish(&self, message: LibraryMessage) -> Result<(), SagaError> {
        let message_type = message.message_type();
        self.bus.publish(message).await?;
        metrics::counter!("api_messages_accepted_total", "type" => message_type).increment(1);
        Ok(())
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/books", post(routes::books::add::<S>))
        .route("/books/{id}", get(routes::books::get::<S>))
        .route("/books/{id}/checkout", post(routes::books::checkout::<S>))
        .route("/reservations", post(routes::reservations::request::<S>))
        .route("/reservations/{id}", get(routes::reservations::get::<S>))
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<S>),
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

/// Wires the workflows onto a channel bus and a tokio-backed scheduler.
///
/// Returns the state together with the bus receiver; nothing is handled
/// until the receiver is passed to [`spawn_runtime`].
pub fn create_default_state<S: SagaStore + Clone + 'static>(
    config: &Config,
    store: S,
) -> Result<(Arc<AppState<S>>, UnboundedReceiver<LibraryMessage>), SagaError> {
    let (bus, receiver) = ChannelBus::new();
    let bus: Arc<dyn MessageBus<LibraryMessage>> = Arc::new(bus);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioScheduler::new(Arc::clone(&bus), Arc::clone(&clock)));

    let library = LibraryRuntime::new(
        &config.library(),
        store,
        Arc::clone(&bus),
        scheduler,
        Arc::clone(&clock),
    )?;

    let state = Arc::new(AppState {
        library,
        bus,
        clock,
    });
    Ok((state, receiver))
}

/// Starts consuming the bus in the background.
pub fn spawn_runtime<S: SagaStore + Clone + 'static>(
    state: &AppState<S>,
    receiver: UnboundedReceiver<LibraryMessage>,
) -> JoinHandle<()> {
    tokio::spawn(state.library.runtime().run(receiver))
}

/// Periodically redelivers outbox entries whose dispatch failed, and drops
/// entries dispatched longer than `retention` ago.
pub fn spawn_outbox_recovery<S: SagaStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    period: Duration,
    retention: chrono::TimeDelta,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match state.library.recover_outbox().await {
                Ok(0) => {}
                Ok(recovered) => tracing::info!(recovered, "outbox entries redelivered"),
                Err(e) => tracing::warn!(error = %e, "outbox recovery failed"),
            }
            purge_outbox(&state, retention).await;
        }
    })
}

/// Drops outbox entries dispatched longer than `retention` ago.
pub async fn purge_outbox<S: SagaStore + Clone + 'static>(
    state: &AppState<S>,
    retention: chrono::TimeDelta,
) -> u64 {
    let Some(before) = state.clock.now().checked_sub_signed(retention) else {
        return 0;
    };
    match state.library.purge_outbox(before).await {
        Ok(purged) => {
            if purged > 0 {
                tracing::info!(purged, "dispatched outbox entries purged");
            }
            purged
        }
        Err(e) => {
            tracing::warn!(error = %e, "outbox purge failed");
            0
        }
    }
}
