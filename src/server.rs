//! The OpenAI-compatible HTTP surface.
//!
//! Four POST routes forward opaque JSON to the backend serving the named
//! model, loading it on demand first; two GET routes enumerate the catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::config::ModelCatalog;
use crate::error::GatewayError;
use crate::forward::post_with_retry;
use crate::scheduler::lifecycle::LifecycleController;

/// Fixed `created` timestamp in model records; part of the wire contract.
const MODEL_CREATED: u64 = 1_686_935_002;

pub struct AppState {
    pub catalog: Arc<ModelCatalog>,
    pub lifecycle: Arc<LifecycleController>,
    pub hostname: String,
    pub http: reqwest::Client,
    pub retry_backoff: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/completions", post(forward_request))
        .route("/v1/chat/completions", post(forward_request))
        .route("/v1/embeddings", post(forward_request))
        .route("/v1/moderations", post(forward_request))
        .route("/v1/models", get(list_models))
        .route("/v1/models/{name}", get(get_model))
        .with_state(state)
}

/// Ensure the requested model is resident, then relay the verbatim body to
/// its backend, preserving the request path and the upstream's status.
async fn forward_request(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    let Some(model_name) = body.get("model").and_then(Value::as_str).map(str::to_owned) else {
        return GatewayError::ModelUnknown.into_response();
    };
    let Some(spec) = state.catalog.get(&model_name) else {
        return GatewayError::ModelUnknown.into_response();
    };

    tracing::info!("Request for model: {}", model_name);
    if let Err(e) = state.lifecycle.ensure_loaded(&model_name).await {
        tracing::error!("Failed to load {}: {}", model_name, e);
        return e.into_response();
    }

    let url = format!("{}{}", spec.upstream, uri.path());
    match post_with_retry(&state.http, &url, &body, state.retry_backoff).await {
        Ok(upstream) => {
            state.lifecycle.mark_used(&model_name, Instant::now());
            tracing::debug!("Request served for {} ({} upstream)", model_name, upstream.status);
            let status =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(upstream.body)).into_response()
        }
        Err(e) => {
            tracing::error!("Forwarding to {} failed: {}", url, e);
            e.into_response()
        }
    }
}

fn model_record(name: &str, hostname: &str) -> Value {
    json!({
        "id": name,
        "object": "model",
        "created": MODEL_CREATED,
        "owned_by": hostname,
    })
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let data: Vec<Value> = state
        .catalog
        .list()
        .iter()
        .map(|name| model_record(name, &state.hostname))
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

async fn get_model(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if state.catalog.contains(&name) {
        Json(model_record(&name, &state.hostname)).into_response()
    } else {
        let body = Json(json!({ "object": "error", "message": "Model not found" }));
        (StatusCode::NOT_FOUND, body).into_response()
    }
}
