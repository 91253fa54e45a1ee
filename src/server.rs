//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness string |
//! | `GET`  | `/api/v1/health` | Health check |
//! | `POST` | `/api/v1/process-query` | Run one query through the pipeline |
//! | `GET`  | `/api/v1/events` | Server-sent progress events (`agent_update`) |
//!
//! `process-query` takes `{"query": "<text>"}` and answers with the
//! pipeline response. A body that is not JSON, or has no string `query`,
//! gets `400 {"error": "Query not provided"}`. Every other outcome,
//! including pipeline failures, is a `200` carrying either the success or
//! the apology shape.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard on
//! another origin can both post queries and listen to progress.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::cors::{Any, CorsLayer};

use crate::models::PipelineResponse;
use crate::notify::BroadcastNotifier;
use crate::pipeline::PipelineController;

pub const LIVENESS: &str = "IntelliClaim Agent Server is running!";

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    controller: Arc<PipelineController>,
    progress: BroadcastNotifier,
}

impl AppState {
    /// `progress` must be the notifier the controller emits to.
    pub fn new(controller: Arc<PipelineController>, progress: BroadcastNotifier) -> Self {
        Self {
            controller,
            progress,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/process-query", post(handle_process_query))
        .route("/api/v1/events", get(handle_events))
        .layer(cors)
        .with_state(state)
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "IntelliClaim server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

// ============ GET / and GET /api/v1/health ============

async fn handle_root() -> &'static str {
    LIVENESS
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============ POST /api/v1/process-query ============

async fn handle_process_query(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<PipelineResponse>, AppError> {
    let query = match &body {
        Ok(Json(value)) => value.get("query").and_then(|q| q.as_str()),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable process-query body");
            None
        }
    };
    let query = query.ok_or_else(|| bad_request("Query not provided"))?;

    tracing::info!(query, "received query");
    Ok(Json(state.controller.run(query).await))
}

// ============ GET /api/v1/events ============

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.progress.subscribe();
    tracing::debug!(listeners = state.progress.listener_count(), "progress listener connected");

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default()
                .event("agent_update")
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(serde_json::json!({ "missed": n }))
                .ok()
                .map(Ok),
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
