//! HTTP API
//!
//! JSON endpoints over the [`Orchestrator`]. Errors are always returned as
//! `{"error": "<reason>"}`.

use crate::orchestrator::{DebugSnapshot, Orchestrator, ReportLookup};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use runwright_common::{
    Error, MessageResponse, RunId, SimulateRequest, SubmitRequest, SubmitResponse,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const SERVICE_NAME: &str = "runwrightd";

/// Shared handler state
pub struct ApiState {
    pub orchestrator: Orchestrator,
    pub frontend_url: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/health", get(health_handler))
        .route("/api/run-tests", post(submit_handler))
        .route("/api/test-simple", post(simulate_handler))
        .route("/api/test-status/:run_id", get(status_handler))
        .route("/api/test-results/:run_id", get(report_handler))
        .route("/api/cancel-test/:run_id", post(cancel_handler))
        .route("/api/test-runs/:run_id", delete(evict_handler))
        .route("/api/debug/:run_id", get(debug_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyTerminal { .. } | Error::StillRunning { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    }
    error_body(status, err.to_string())
}

/// Path ids that are not run identifiers can never name a run.
fn parse_run_id(raw: &str) -> Result<RunId, Response> {
    raw.parse::<RunId>()
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "Invalid run ID"))
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

async fn index_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(json!({
        "message": "Runwright test runner API",
        "service": SERVICE_NAME,
        "version": runwright_common::VERSION,
        "status": "running",
        "endpoints": {
            "POST /api/run-tests": "Start test execution",
            "GET /api/test-status/:runId": "Get test progress",
            "GET /api/test-results/:runId": "Get test results",
            "POST /api/cancel-test/:runId": "Cancel running test",
            "DELETE /api/test-runs/:runId": "Forget a finished test run",
            "GET /api/debug/:runId": "Debug test run data",
            "POST /api/test-simple": "Mock test without launching a browser",
        },
        "frontend": state.frontend_url,
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}

async fn submit_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.orchestrator.submit(&req.url, req.agents.as_deref()) {
        Ok(run_id) => Json(SubmitResponse {
            run_id,
            message: "Tests started".to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn simulate_handler(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.orchestrator.simulate(&req.url) {
        Ok(run_id) => Json(SubmitResponse {
            run_id,
            message: "Simple test completed".to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn status_handler(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.status(&run_id) {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn report_handler(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.report(&run_id) {
        Ok(ReportLookup::Ready(report)) => Json(report).into_response(),
        Ok(ReportLookup::Pending) => (
            StatusCode::ACCEPTED,
            Json(MessageResponse {
                message: "Test still running".to_string(),
            }),
        )
            .into_response(),
        Ok(ReportLookup::Missing) => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Test completed but no results available",
        ),
        Err(e) => error_response(&e),
    }
}

async fn cancel_handler(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.cancel(&run_id).await {
        Ok(()) => Json(MessageResponse {
            message: "Test cancelled successfully".to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn evict_handler(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.evict(&run_id).await {
        Ok(_) => Json(MessageResponse {
            message: "Test run removed".to_string(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn debug_handler(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.debug(&run_id) {
        DebugSnapshot::Known(snapshot) => Json(snapshot).into_response(),
        DebugSnapshot::Unknown(unknown) => (StatusCode::NOT_FOUND, Json(unknown)).into_response(),
    }
}
