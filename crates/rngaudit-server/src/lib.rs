//! HTTP validation service.
//!
//! Accepts a raw sample as the request body, runs a named battery over it and
//! returns the serialised session. The engine is blocking, so every run is
//! moved onto tokio's blocking pool.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use rngaudit_core::{
    BatteryRegistry, BufferSource, SessionController, ValidationConfig, ValidationError,
};

/// Largest accepted sample body (64 MiB, about 5·10⁸ bits).
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared server state.
struct AppState {
    registry: BatteryRegistry,
    config: ValidationConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ValidateParams {
    battery: Option<String>,
    significance: Option<f64>,
    sequences: Option<usize>,
    timeout_sec: Option<f64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    batteries: usize,
    tests: usize,
}

type ApiResult = (StatusCode, Json<serde_json::Value>);

fn error_status(err: &ValidationError) -> StatusCode {
    match err {
        ValidationError::UnknownBattery(_) | ValidationError::UnknownTest(_) => {
            StatusCode::NOT_FOUND
        }
        ValidationError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ValidationError::InvalidConfig(_)
        | ValidationError::InvalidBattery { .. }
        | ValidationError::DuplicateBattery(_)
        | ValidationError::DuplicateTest(_)
        | ValidationError::Json(_) => StatusCode::BAD_REQUEST,
        ValidationError::Source(_) | ValidationError::WorkerSpawn(_) | ValidationError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, error: String) -> ApiResult {
    let body = ErrorResponse {
        success: false,
        error,
    };
    (
        status,
        Json(serde_json::to_value(body).unwrap_or(serde_json::Value::Null)),
    )
}

async fn handle_validate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValidateParams>,
    body: Bytes,
) -> ApiResult {
    let battery = params
        .battery
        .unwrap_or_else(|| rngaudit_core::NIST_SP800_22_BASIC.to_string());
    let mut config = state.config.clone();
    if params.significance.is_some() {
        config.significance_level = params.significance;
    }
    if params.sequences.is_some() {
        config.sequences_for_second_order = params.sequences;
    }
    if params.timeout_sec.is_some() {
        config.timeout_secs = params.timeout_sec;
    }

    let registry = state.registry.clone();
    let bytes = body.to_vec();
    let job = tokio::task::spawn_blocking(move || {
        let controller = SessionController::new(registry, config)?;
        let mut source = BufferSource::new("http-body", bytes);
        controller.run(&mut source, &battery)
    });

    match job.await {
        Ok(Ok(session)) => match serde_json::to_value(&session) {
            Ok(value) => (StatusCode::OK, Json(value)),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Ok(Err(e)) => {
            log::warn!("validate rejected: {e}");
            error_response(error_status(&e), e.to_string())
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("validation task failed: {e}"),
        ),
    }
}

async fn handle_batteries(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let batteries: Vec<_> = state.registry.batteries().collect();
    Json(serde_json::json!({
        "total": batteries.len(),
        "batteries": batteries,
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        batteries: state.registry.batteries().count(),
        tests: state.registry.tests().count(),
    })
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let names: Vec<&str> = state
        .registry
        .batteries()
        .map(|b| b.name.as_str())
        .collect();
    Json(serde_json::json!({
        "name": "rngaudit server",
        "version": rngaudit_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "/api/v1/validate": {
                "method": "POST",
                "description": "Run a battery over the raw request body",
                "params": {
                    "battery": format!("Battery name (default: {}). Available: {}", rngaudit_core::NIST_SP800_22_BASIC, names.join(", ")),
                    "significance": "Significance level in (0, 1)",
                    "sequences": "Number of sequences for the second-order analysis",
                    "timeout_sec": "Execution timeout in seconds",
                }
            },
            "/api/v1/batteries": "List registered batteries",
            "/health": "Health check",
        },
        "examples": {
            "basic": "curl --data-binary @sample.bin /api/v1/validate",
            "full": "curl --data-binary @sample.bin '/api/v1/validate?battery=nist-sp800-22&significance=0.001'",
        }
    }))
}

/// Build the axum router.
fn build_router(registry: BatteryRegistry, config: ValidationConfig) -> Router {
    let state = Arc::new(AppState { registry, config });

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/v1/batteries", get(handle_batteries))
        .route("/api/v1/validate", post(handle_validate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the HTTP validation server until the listener fails.
pub async fn run_server(
    registry: BatteryRegistry,
    config: ValidationConfig,
    host: &str,
    port: u16,
) -> std::io::Result<()> {
    let app = build_router(registry, config);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, app).await
}
