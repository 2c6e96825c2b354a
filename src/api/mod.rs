// API routes: project endpoints under the configured prefix plus a health probe.
pub mod errors;
pub mod project;

use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>, api_prefix: &str) -> Router {
    let prefix = normalize_prefix(api_prefix);
    let api = project::router();
    let router = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&prefix, api)
    };
    router.route("/health", get(health)).with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
