//! Axum Handlers for the REST API
//!
//! Thin adapters from HTTP to the [`rehearsal_core::SessionManager`]. Every
//! route is scoped to the caller named by the `x-user-id` header; sessions of
//! other users are reported as missing.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use rehearsal_core::{PracticeError, Session};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        CompletionReportResponse, ErrorResponse, RespondPayload, RespondResponse, SessionView,
        SimulationStartedResponse, SimulationStatusResponse, StartSimulationPayload,
    },
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err: anyhow::Error = err.into();
        match err.downcast::<PracticeError>() {
            Ok(PracticeError::Validation(message)) => Self::BadRequest(message),
            Ok(err @ PracticeError::NotFound { .. }) => Self::NotFound(err.to_string()),
            Ok(err @ PracticeError::ConcurrencyConflict(_)) => Self::Conflict(err.to_string()),
            Ok(PracticeError::Internal(inner)) => Self::InternalServerError(inner),
            Err(other) => Self::InternalServerError(other),
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// Loads a session and hides it from everyone but its owner.
async fn owned_session(state: &AppState, id: Uuid, user_id: &str) -> Result<Session, ApiError> {
    let session = state.manager.session(id).await?;
    if session.user_id != user_id {
        return Err(ApiError::NotFound(format!("session '{id}' not found")));
    }
    Ok(session)
}

/// Start a new practice simulation.
#[utoipa::path(
    post,
    path = "/simulations",
    request_body = StartSimulationPayload,
    responses(
        (status = 201, description = "Simulation started", body = SimulationStartedResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Scenario not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user starting the simulation")
    )
)]
pub async fn start_simulation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<StartSimulationPayload>,
) -> Result<(StatusCode, Json<SimulationStartedResponse>), ApiError> {
    let user_id = user_id(&headers)?;
    let started = state.manager.start(payload.into_request(user_id)).await?;
    info!(session_id = %started.session.id, user_id, "Simulation started via API");
    Ok((StatusCode::CREATED, Json(started.into())))
}

/// Submit a response to the current step.
#[utoipa::path(
    post,
    path = "/simulations/{id}/respond",
    request_body = RespondPayload,
    responses(
        (status = 200, description = "Response evaluated", body = RespondResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is being updated concurrently", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn respond(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondPayload>,
) -> Result<Json<RespondResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let outcome = state.manager.respond(id, payload.into()).await?;
    Ok(Json(outcome.into()))
}

/// Get the state and progress of a simulation.
#[utoipa::path(
    get,
    path = "/simulations/{id}",
    responses(
        (status = 200, description = "Simulation status", body = SimulationStatusResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_simulation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationStatusResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let view = state.manager.status(id).await?;
    Ok(Json(view.into()))
}

/// Get the completion report of a finished simulation.
#[utoipa::path(
    get,
    path = "/simulations/{id}/report",
    responses(
        (status = 200, description = "Completion report", body = CompletionReportResponse),
        (status = 400, description = "Simulation not completed", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CompletionReportResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let report = state.manager.completion_report(id).await?;
    Ok(Json(CompletionReportResponse { report }))
}

/// Abandon an active simulation.
#[utoipa::path(
    post,
    path = "/simulations/{id}/abandon",
    responses(
        (status = 200, description = "Simulation abandoned", body = SessionView),
        (status = 400, description = "Simulation already finished", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session is being updated concurrently", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let user_id = user_id(&headers)?;
    owned_session(&state, id, user_id).await?;
    let session = state.manager.abandon(id).await?;
    Ok(Json(SessionView::from(&session)))
}
