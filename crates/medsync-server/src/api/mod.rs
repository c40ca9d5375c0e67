//! HTTP surface: router assembly, health endpoint and the serve loop

pub mod response;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;

use crate::config::Config;
use crate::db::{self, PgStores};
use crate::features::{self, FeatureState, ImportState};
use crate::ingest::ImportPipeline;
use crate::middleware;

/// Timeout for requests the server makes to cloud sources
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub imports: ImportState,
}

impl AppState {
    /// Wire the Postgres stores into a pipeline configured from `config`
    pub fn new(config: &Config, db: PgPool) -> anyhow::Result<Self> {
        let stores = PgStores::new(db.clone());
        let pipeline = ImportPipeline::new(stores.records, stores.references, stores.history)
            .with_priorities(config.import.priorities())
            .with_reference_chunk_size(config.import.reference_chunk_size)
            .with_read_chunk_bytes(config.import.stream_read_chunk_bytes);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("medsync-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let imports = ImportState::new(pipeline, config.catalog(), http)
            .with_max_upload_bytes(config.import.max_upload_bytes);

        Ok(Self { db, imports })
    }
}

/// Connect, migrate and serve until a shutdown signal arrives
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let shutdown = CancellationToken::new();
    let mut state = AppState::new(&config, pool)?;
    state.imports = state.imports.with_shutdown(shutdown.clone());

    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown, config.server.shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    let api_v1 = features::router(FeatureState {
        imports: state.imports.clone(),
    });

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(Arc::new(state))
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::tracing_layer())
                .layer(middleware::cors_layer(&config.cors)),
        )
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Medsync Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "unreachable" })),
            )
                .into_response()
        },
    }
}

/// Resolve on Ctrl+C or SIGTERM, cancelling running imports
async fn shutdown_signal(shutdown: CancellationToken, timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received terminate signal, starting graceful shutdown"),
    }

    // Runs stop at their next chunk boundary and record themselves as failed
    shutdown.cancel();
    tracing::info!(timeout_secs, "Waiting for connections to close");
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
