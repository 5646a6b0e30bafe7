use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use utoipa::ToSchema;

use crate::action::{ActionKind, ActionParams, parse_bool};
use crate::context::RequestContext;
use crate::controller::{ActionResult, Outcome, Tracking};
use crate::dispatcher::Dispatcher;
use crate::error::ControllerError;
use crate::model::{Container, CreateRequest, UpdateRequest};

use super::types::{ContainerEvent, ContainerListResponse, VersionInfo};

pub const PROJECT_HEADER: &str = "x-project-id";
pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
pub struct AppState {
    pub dispatcher: Dispatcher,
}

/// API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            400 => StatusCode::BAD_REQUEST,
            405 => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        let code = match &e {
            ControllerError::InvalidState { .. } | ControllerError::Conflict(_) => 409,
            ControllerError::Validation(_) => 400,
            ControllerError::NotFound(_) => 404,
            ControllerError::Driver(_) | ControllerError::Network(_) | ControllerError::Store(_) => {
                500
            }
        };
        ApiError {
            error: e.to_string(),
            code,
        }
    }
}

/// Build the caller's context from headers and the `all_tenants` flag,
/// removing the flag from `params`.
fn request_context(
    state: &AppState,
    headers: &HeaderMap,
    params: &mut ActionParams,
) -> Result<RequestContext, ApiError> {
    let config = state.dispatcher.controller().config();
    let header = |name: &str, default: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    let all_tenants = match params.remove("all_tenants") {
        Some(raw) => parse_bool("all_tenants", &raw)?,
        None => false,
    };

    Ok(RequestContext::new(
        header(PROJECT_HEADER, &config.default_project),
        header(USER_HEADER, &config.default_user),
    )
    .with_all_tenants(all_tenants))
}

fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Accepted(tracking) => (StatusCode::ACCEPTED, Json(tracking)).into_response(),
        Outcome::Completed(ActionResult::Empty) => StatusCode::OK.into_response(),
        Outcome::Completed(result) => (StatusCode::OK, Json(result)).into_response(),
    }
}

/// Unwrap a typed JSON body, reporting malformed or unexpected fields as 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|e| ApiError {
        error: format!("Invalid input for field(s): {}", e.body_text()),
        code: 400,
    })
}

/// Flatten a JSON object body into action parameters. Query parameters win.
fn merge_body(params: &mut ActionParams, body: &Bytes) -> Result<(), ApiError> {
    if body.is_empty() {
        return Ok(());
    }
    let fields: BTreeMap<String, Value> =
        serde_json::from_slice(body).map_err(|e| ApiError {
            error: format!("Invalid request body: {}", e),
            code: 400,
        })?;
    for (key, value) in fields {
        let value = match value {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        params.entry(key).or_insert(value);
    }
    Ok(())
}

// =============================================================================
// System
// =============================================================================

/// Get service version
#[utoipa::path(
    get,
    path = "/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Containers
// =============================================================================

/// Create a container
#[utoipa::path(
    post,
    path = "/v1/containers",
    params(
        ("run" = Option<bool>, Query, description = "Start the container once created")
    ),
    request_body = CreateRequest,
    responses(
        (status = 202, description = "Container accepted for creation", body = Container),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 409, description = "Name already in use", body = ApiError)
    ),
    tag = "containers"
)]
pub async fn create_container(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(mut params): Query<ActionParams>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Container>), ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    let req = json_body(payload)?;
    let (container, _) = state
        .dispatcher
        .create(&ctx, req, params.get("run").map(String::as_str))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(container)))
}

/// List containers visible to the caller
#[utoipa::path(
    get,
    path = "/v1/containers",
    params(
        ("all_tenants" = Option<bool>, Query, description = "List containers of every project"),
        ("limit" = Option<usize>, Query, description = "Page size"),
        ("marker" = Option<String>, Query, description = "UUID of the last container of the previous page"),
        ("sort_key" = Option<String>, Query, description = "id, uuid, name, status, created_at or updated_at"),
        ("sort_dir" = Option<String>, Query, description = "asc or desc"),
        ("status" = Option<String>, Query, description = "Filter by state"),
        ("name" = Option<String>, Query, description = "Filter by name"),
        ("image" = Option<String>, Query, description = "Filter by image")
    ),
    responses(
        (status = 200, description = "List of containers", body = ContainerListResponse),
        (status = 400, description = "Invalid query", body = ApiError)
    ),
    tag = "containers"
)]
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(mut params): Query<ActionParams>,
) -> Result<Json<ContainerListResponse>, ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    let containers = state.dispatcher.list(&ctx, &params).await?;
    Ok(Json(ContainerListResponse { containers }))
}

/// Get a container by UUID or name
#[utoipa::path(
    get,
    path = "/v1/containers/{ident}",
    params(
        ("ident" = String, Path, description = "Container UUID or name")
    ),
    responses(
        (status = 200, description = "Container found", body = Container),
        (status = 404, description = "Container not found", body = ApiError)
    ),
    tag = "containers"
)]
pub async fn get_container(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ident): Path<String>,
    Query(mut params): Query<ActionParams>,
) -> Result<Json<Container>, ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    Ok(Json(state.dispatcher.get(&ctx, &ident).await?))
}

/// Update memory and cpu limits
#[utoipa::path(
    patch,
    path = "/v1/containers/{ident}",
    params(
        ("ident" = String, Path, description = "Container UUID or name")
    ),
    request_body = UpdateRequest,
    responses(
        (status = 200, description = "Container updated", body = Container),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Container not found", body = ApiError),
        (status = 409, description = "Container changed concurrently or is in the wrong state", body = ApiError)
    ),
    tag = "containers"
)]
pub async fn update_container(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ident): Path<String>,
    Query(mut params): Query<ActionParams>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    let req = json_body(payload)?;
    let outcome = state.dispatcher.update(&ctx, &ident, req).await?;
    Ok(outcome_response(outcome))
}

/// Delete a container
#[utoipa::path(
    delete,
    path = "/v1/containers/{ident}",
    params(
        ("ident" = String, Path, description = "Container UUID or name"),
        ("force" = Option<bool>, Query, description = "Delete regardless of state and collaborator failures")
    ),
    responses(
        (status = 204, description = "Deletion accepted"),
        (status = 404, description = "Container not found", body = ApiError),
        (status = 409, description = "Container is in the wrong state", body = ApiError)
    ),
    tag = "containers"
)]
pub async fn delete_container(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ident): Path<String>,
    Query(mut params): Query<ActionParams>,
) -> Result<StatusCode, ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    state
        .dispatcher
        .dispatch(&ctx, &ident, ActionKind::Delete.name(), &params)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Actions
// =============================================================================

/// Run an action on a container
///
/// Parameters come from the query string and, for POST, from a flat JSON
/// object body.
#[utoipa::path(
    post,
    path = "/v1/containers/{ident}/{action}",
    params(
        ("ident" = String, Path, description = "Container UUID or name"),
        ("action" = String, Path, description = "Action name, e.g. start, stop, kill, logs")
    ),
    request_body = Option<serde_json::Value>,
    responses(
        (status = 200, description = "Action completed"),
        (status = 202, description = "Action accepted", body = Tracking),
        (status = 400, description = "Unknown action or invalid parameters", body = ApiError),
        (status = 404, description = "Container not found", body = ApiError),
        (status = 409, description = "Action not allowed in the current state", body = ApiError),
        (status = 500, description = "Runtime or network failure", body = ApiError)
    ),
    tag = "actions"
)]
pub async fn post_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((ident, action)): Path<(String, String)>,
    Query(mut params): Query<ActionParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &mut params)?;
    merge_body(&mut params, &body)?;
    let outcome = state
        .dispatcher
        .dispatch(&ctx, &ident, &action, &params)
        .await?;
    Ok(outcome_response(outcome))
}

/// Run a read-only action on a container
#[utoipa::path(
    get,
    path = "/v1/containers/{ident}/{action}",
    params(
        ("ident" = String, Path, description = "Container UUID or name"),
        ("action" = String, Path, description = "logs, stats, top, attach or get_archive")
    ),
    responses(
        (status = 200, description = "Action completed"),
        (status = 400, description = "Unknown action or invalid parameters", body = ApiError),
        (status = 404, description = "Container not found", body = ApiError),
        (status = 405, description = "Action changes the container; use POST", body = ApiError)
    ),
    tag = "actions"
)]
pub async fn get_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((ident, action)): Path<(String, String)>,
    Query(mut params): Query<ActionParams>,
) -> Result<Response, ApiError> {
    if ActionKind::from_name(&action).is_some_and(|kind| !kind.is_read_only()) {
        return Err(ApiError {
            error: format!("Action {} requires POST", action),
            code: 405,
        });
    }
    let ctx = request_context(&state, &headers, &mut params)?;
    let outcome = state
        .dispatcher
        .dispatch(&ctx, &ident, &action, &params)
        .await?;
    Ok(outcome_response(outcome))
}

// =============================================================================
// Events
// =============================================================================

/// Stream container record changes as server-sent events
pub async fn container_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(mut params): Query<ActionParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let scope = request_context(&state, &headers, &mut params)?.scope();
    let mut rx = state.dispatcher.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !scope.includes_project(event.project_id()) {
                        continue;
                    }
                    match serde_json::to_string(&ContainerEvent::from(&event)) {
                        Ok(data) => yield Ok(SseEvent::default().event(event.kind()).data(data)),
                        Err(e) => warn!(error = %e, "Failed to encode container event"),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    ))
}
