use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::{RunMode, RunOptions, RunReport};
use crate::error::{kinds, ErrorPayload, WeftError};
use crate::workspace::Workspace;

/// HTTP server state
#[derive(Clone)]
struct AppState {
    workspace: Arc<Workspace>,
}

/// HTTP shell around the engine
///
/// - GET /health - Health check
/// - GET /resources - Registered resources
/// - POST /run - Run a resource, optionally as a DAG
/// - POST /run/stream - Stream a resource's output as `{"chunks": [...]}`
/// - GET /cache/{name} - Last cached outputs of a resource
pub struct HttpServer {
    bind: String,
    workspace: Arc<Workspace>,
}

impl HttpServer {
    pub fn new(bind: impl Into<String>, workspace: Arc<Workspace>) -> Self {
        Self {
            bind: bind.into(),
            workspace,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            workspace: self.workspace.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/resources", get(list_resources))
            .route("/run", post(run_resource))
            .route("/run/stream", post(stream_resource))
            .route("/cache/{name}", get(get_cached))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down HTTP server");
            })
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    name: String,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    dag: bool,
    #[serde(default)]
    reuse_cache: bool,
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamRequest {
    name: String,
    #[serde(default)]
    variables: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(flatten)]
    error: ErrorPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<RunReport>,
}

fn status_for(kind: &str) -> StatusCode {
    match kind {
        kinds::NOT_FOUND => StatusCode::NOT_FOUND,
        kinds::CONFLICT => StatusCode::CONFLICT,
        kinds::CYCLE_DETECTED
        | kinds::MISSING_DEPENDENCY
        | kinds::REQUEST_ERROR
        | kinds::REGISTRATION_ERROR => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: ErrorPayload, report: Option<RunReport>) -> Response {
    let status = status_for(&error.kind);
    (status, Json(ErrorBody { error, report })).into_response()
}

/// Describe the files `name` needs so edits made while serving are picked up
fn rescan(workspace: &Workspace, name: &str) {
    let report = workspace
        .registry()
        .scan_partial(workspace.root(), workspace.config(), name);
    if !report.is_clean() {
        warn!(
            resource = %name,
            error_count = report.errors.len(),
            "some resource files failed to register"
        );
    }
}

fn persist(workspace: &Workspace) {
    if let Err(e) = workspace.persist() {
        warn!(error = %format!("{:#}", e), "failed to persist workspace state");
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_resources(State(state): State<AppState>) -> Response {
    Json(state.workspace.registry().list()).into_response()
}

async fn run_resource(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Response {
    let options = RunOptions {
        mode: if request.dag { RunMode::Dag } else { RunMode::Single },
        reuse_cache: request.reuse_cache,
        run_id: request.run_id,
    };

    let workspace = state.workspace.clone();
    let name = request.name.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        rescan(&workspace, &request.name);
        workspace
            .engine()
            .run(&request.name, &request.variables, &options)
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            info!(resource = %name, kind = e.kind(), "run rejected");
            return error_response(e.to_payload(), None);
        }
        Err(e) => {
            warn!(resource = %name, error = %e, "run task panicked");
            return error_response(ErrorPayload::new(kinds::EXECUTION_ERROR, e.to_string()), None);
        }
    };

    persist(&state.workspace);

    match report.failure().and_then(|record| record.error.clone()) {
        Some(error) => error_response(error, Some(report)),
        None => (StatusCode::OK, Json(report)).into_response(),
    }
}

async fn stream_resource(
    State(state): State<AppState>,
    Json(request): Json<StreamRequest>,
) -> Response {
    let workspace = state.workspace.clone();
    let name = request.name.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || rescan(&workspace, &name)).await {
        warn!(resource = %request.name, error = %e, "rescan task panicked");
    }

    let chunks = match state
        .workspace
        .engine()
        .run_streaming(&request.name, &request.variables)
    {
        Ok(chunks) => chunks,
        Err(e) => return error_response(e.to_payload(), None),
    };

    let mut first = true;
    let items = chunks.map(move |chunk| {
        let json = serde_json::to_string(&chunk).unwrap_or_else(|_| "null".to_string());
        let separator = if first { "" } else { "," };
        first = false;
        Ok::<_, Infallible>(Bytes::from(format!("{}{}", separator, json)))
    });

    let workspace = state.workspace.clone();
    let closing = tokio_stream::iter([()]).map(move |_| {
        persist(&workspace);
        Ok::<_, Infallible>(Bytes::from_static(b"]}"))
    });

    let body = tokio_stream::iter([Ok::<_, Infallible>(Bytes::from_static(b"{\"chunks\": ["))])
        .chain(items)
        .chain(closing);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            error_response(ErrorPayload::new(kinds::EXECUTION_ERROR, e.to_string()), None)
        })
}

#[derive(Debug, Serialize)]
struct CachedOutputs {
    name: String,
    id: String,
    output_paths: Vec<std::path::PathBuf>,
    timestamp: chrono::DateTime<chrono::Utc>,
    ttl: Option<u64>,
}

async fn get_cached(Path(name): Path<String>, State(state): State<AppState>) -> Response {
    let engine = state.workspace.engine();
    let resource = match engine.resolve(&name) {
        Ok(resource) => resource,
        Err(e) => return error_response(e.to_payload(), None),
    };

    match engine.cache().get(&resource.id) {
        Some(entry) => Json(CachedOutputs {
            name: resource.name,
            id: resource.id,
            output_paths: entry.output_paths,
            timestamp: entry.timestamp,
            ttl: entry.ttl,
        })
        .into_response(),
        None => error_response(
            WeftError::NotFound(format!("no cached output for '{}'", name)).to_payload(),
            None,
        ),
    }
}
