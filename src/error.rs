use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GPU telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("Model not specified or not found")]
    ModelUnknown,

    #[error("Not enough VRAM available in any GPU: {required} MiB required, GPU totals {observed:?} MiB")]
    InsufficientCapacity { required: u64, observed: Vec<u64> },

    #[error("No feasible eviction plan: {0}. Ensure no other programs are using VRAM")]
    EvictionInfeasible(String),

    #[error("Failed to spawn backend process: {0}")]
    SpawnFailed(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

/// Map gateway errors onto the OpenAI-style error wire format.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::ModelUnknown => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "object": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
