use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub module_id: Option<String>,
}

/// `DELETE /cache[?module_id=]`
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Json<Value> {
    let deleted = state.runner.clear_cache(query.module_id.as_deref()).await;
    Json(json!({ "deleted": deleted }))
}

/// `DELETE /cache/expired`
pub async fn clear_expired(State(state): State<AppState>) -> Json<Value> {
    let deleted = state.runner.clear_expired_cache().await;
    Json(json!({ "deleted": deleted }))
}
