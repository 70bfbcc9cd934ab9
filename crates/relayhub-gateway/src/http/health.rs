//! Liveness probe — ambient; every reference service in this lineage carries one.

use axum::Json;
use serde_json::{json, Value};

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
