//! HTTP status and trigger API.
//!
//! Read-only consumers poll `/grid/current` for the latest published risk
//! grid; `/status` reports the last run; `POST /run` triggers a run out of
//! schedule. Only one run is active at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use archive_client::ArchiveApi;

use crate::run::{Pipeline, RunReport};

pub struct ServerState<A: ArchiveApi> {
    pub pipeline: Arc<Pipeline<A>>,
    pub last_run: RwLock<Option<RunReport>>,
    pub running: AtomicBool,
}

impl<A: ArchiveApi> ServerState<A> {
    pub fn new(pipeline: Arc<Pipeline<A>>) -> Self {
        Self {
            pipeline,
            last_run: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    service: String,
    state: String,
    current_provenance: Option<String>,
    last_run: Option<RunReport>,
}

#[derive(Debug, Serialize)]
struct RunTriggerResponse {
    started: bool,
    message: String,
}

pub fn create_router<A: ArchiveApi + 'static>(state: Arc<ServerState<A>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler::<A>))
        .route("/grid/current", get(grid_handler::<A>))
        .route("/run", post(run_handler::<A>))
        .layer(cors)
        .layer(Extension(state))
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pipeline"
    }))
}

/// GET /status
async fn status_handler<A: ArchiveApi>(
    Extension(state): Extension<Arc<ServerState<A>>>,
) -> impl IntoResponse {
    let current_provenance = match state.pipeline.publisher().current_provenance().await {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let response = StatusResponse {
        service: "pipeline".to_string(),
        state: if state.running.load(Ordering::SeqCst) {
            "running".to_string()
        } else {
            "idle".to_string()
        },
        current_provenance,
        last_run: state.last_run.read().await.clone(),
    };
    Json(response).into_response()
}

/// GET /grid/current - the latest published risk grid
async fn grid_handler<A: ArchiveApi>(
    Extension(state): Extension<Arc<ServerState<A>>>,
) -> impl IntoResponse {
    match state.pipeline.publisher().current().await {
        Ok(Some(grid)) => Json(grid).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no grid published yet" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// POST /run - trigger a run out of schedule
async fn run_handler<A: ArchiveApi + 'static>(
    Extension(state): Extension<Arc<ServerState<A>>>,
) -> impl IntoResponse {
    if state
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return (
            StatusCode::CONFLICT,
            Json(RunTriggerResponse {
                started: false,
                message: "a run is already in progress".to_string(),
            }),
        );
    }

    let state_clone = state.clone();
    tokio::spawn(async move {
        execute_run(&state_clone).await;
        state_clone.running.store(false, Ordering::SeqCst);
    });

    (
        StatusCode::ACCEPTED,
        Json(RunTriggerResponse {
            started: true,
            message: "run started".to_string(),
        }),
    )
}

/// Run the pipeline once and record the report.
pub async fn execute_run<A: ArchiveApi>(state: &ServerState<A>) {
    match state.pipeline.run_once().await {
        Ok(report) => {
            info!(
                outcome = ?report.outcome,
                provenance = %report.provenance,
                duration_ms = report.duration_ms,
                "Run finished"
            );
            *state.last_run.write().await = Some(report);
        }
        Err(e) => {
            error!(error = %e, transient = e.is_transient(), "Run failed");
        }
    }
}

/// Start the HTTP server.
pub async fn run_server<A: ArchiveApi + 'static>(
    state: Arc<ServerState<A>>,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port, "Starting pipeline status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
