//! API server entry point.

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use saga_engine::SagaStore;
use saga_store::{InMemorySagaStore, PostgresSagaStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve<S: SagaStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    let (state, receiver) =
        api::create_default_state(&config, store).expect("invalid workflow definitions");
    let runtime_task = api::spawn_runtime(&state, receiver);

    // Effects left undelivered by a previous process.
    match state.library.recover_outbox().await {
        Ok(recovered) => tracing::info!(recovered, "startup outbox recovery complete"),
        Err(e) => tracing::warn!(error = %e, "startup outbox recovery failed"),
    }
    // Timers armed by a previous process died with it.
    match state.library.rearm_expirations().await {
        Ok(rearmed) => tracing::info!(rearmed, "startup expiry re-arm complete"),
        Err(e) => tracing::warn!(error = %e, "startup expiry re-arm failed"),
    }
    let recovery_task = api::spawn_outbox_recovery(
        state.clone(),
        config.outbox_recovery_interval(),
        config.outbox_retention(),
    );

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    recovery_task.abort();
    runtime_task.abort();
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the saga store and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresSagaStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL saga store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory saga store");
            serve(config, InMemorySagaStore::new(), metrics_handle).await;
        }
    }
}
