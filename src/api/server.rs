//! axum server exposing the assignment engine over JSON/HTTP.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::idempotency::IDEMPOTENCY_KEY_HEADER;
use crate::engine::{AssignmentEngine, EngineResponse, IdempotencyContext};
use crate::error::{ApiError, ApiResult};
use crate::requests::{
    parse_assign_body, parse_idempotency_key, parse_list_query, parse_unassign_body,
};

/// Set to `true` on responses served from the idempotency ledger.
pub const REPLAY_HEADER: &str = "x-idempotency-replay";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}

impl IntoResponse for EngineResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, Json(self.body)).into_response();
        if self.replayed {
            response
                .headers_mut()
                .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

/// Health check response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn idempotency_context(
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
) -> ApiResult<Option<IdempotencyContext>> {
    let raw = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| {
            ApiError::validation(
                "Idempotency-Key must be visible ASCII",
                Some(IDEMPOTENCY_KEY_HEADER),
            )
        })?),
        None => None,
    };

    Ok(parse_idempotency_key(raw)?
        .map(|key| IdempotencyContext::new(key, method.as_str(), uri.path())))
}

async fn assign_handler(
    State(engine): State<AssignmentEngine>,
    Path(task_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<EngineResponse> {
    if task_id.trim().is_empty() {
        return Err(ApiError::invalid_task_id());
    }
    let input = parse_assign_body(&body)?;
    let idempotency = idempotency_context(&headers, &method, &uri)?;

    engine.assign(&task_id, &input, idempotency.as_ref())
}

async fn unassign_handler(
    State(engine): State<AssignmentEngine>,
    Path(task_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<EngineResponse> {
    if task_id.trim().is_empty() {
        return Err(ApiError::invalid_task_id());
    }
    let input = parse_unassign_body(&body)?;
    let idempotency = idempotency_context(&headers, &method, &uri)?;

    engine.unassign(&task_id, &input, idempotency.as_ref())
}

/// Query parameters for the assignment history listing.
#[derive(Debug, serde::Deserialize)]
struct ListAssignmentsParams {
    limit: Option<String>,
    cursor: Option<String>,
}

async fn list_assignments_handler(
    State(engine): State<AssignmentEngine>,
    Path(task_id): Path<String>,
    Query(params): Query<ListAssignmentsParams>,
) -> ApiResult<Response> {
    if task_id.trim().is_empty() {
        return Err(ApiError::invalid_task_id());
    }
    let query = parse_list_query(
        params.limit.as_deref(),
        params.cursor.as_deref(),
        engine.page_limits(),
    )?;
    let page = engine.list_assignments(&task_id, &query)?;
    Ok(Json(page).into_response())
}

/// Build the router with all routes.
pub fn build_router(engine: AssignmentEngine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/tasks/{task_id}/assign", post(assign_handler))
        .route("/api/tasks/{task_id}/unassign", post(unassign_handler))
        .route(
            "/api/tasks/{task_id}/assignments",
            get(list_assignments_handler),
        )
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Handle for a running server.
pub struct ServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

impl ServerHandle {
    /// The address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::error!("Server task failed: {}", e);
        }
    }
}

/// Bind `host:port` and serve in the background.
///
/// Port 0 picks a free port; read it back from [`ServerHandle::addr`].
pub async fn start_server(
    engine: AssignmentEngine,
    host: &str,
    port: u16,
) -> anyhow::Result<ServerHandle> {
    let app = build_router(engine);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;

    info!("Assignment server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("Assignment server shutting down");
            })
            .await
        {
            tracing::error!("Assignment server error: {}", e);
        }
    });

    Ok(ServerHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
        addr,
    })
}
