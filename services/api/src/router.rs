//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CompletionReportResponse, ErrorResponse, RespondPayload, RespondResponse, SessionView,
        SimulationStartedResponse, SimulationStatusResponse, StartSimulationPayload, StepView,
        UserContextPayload,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_simulation,
        handlers::respond,
        handlers::get_simulation,
        handlers::get_report,
        handlers::abandon,
    ),
    components(
        schemas(
            StartSimulationPayload,
            UserContextPayload,
            RespondPayload,
            SimulationStartedResponse,
            RespondResponse,
            SimulationStatusResponse,
            CompletionReportResponse,
            SessionView,
            StepView,
            ErrorResponse
        )
    ),
    tags(
        (name = "Rehearsal API", description = "Adaptive soft-skill practice simulations")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/simulations", post(handlers::start_simulation))
        .route("/simulations/{id}", get(handlers::get_simulation))
        .route("/simulations/{id}/respond", post(handlers::respond))
        .route("/simulations/{id}/report", get(handlers::get_report))
        .route("/simulations/{id}/abandon", post(handlers::abandon))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        for expected in [
            "/simulations",
            "/simulations/{id}",
            "/simulations/{id}/respond",
            "/simulations/{id}/report",
            "/simulations/{id}/abandon",
        ] {
            assert!(
                paths.iter().any(|p| p.as_str() == expected),
                "missing {expected} in {paths:?}"
            );
        }
    }
}
