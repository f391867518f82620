//! Module catalogue, execution, run history and config endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{AppError, RunnerError};
use crate::modules::{ModuleConfig, ModuleMetadata, ModuleResult};
use crate::schedule::Schedule;
use crate::store::RunRecord;

const DEFAULT_RUNS_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Merged over the module's resolved params for this run only.
    #[serde(default)]
    pub params: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub use_cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

fn not_found(module_id: &str) -> AppError {
    RunnerError::ModuleNotFound {
        module_id: module_id.to_string(),
    }
    .into()
}

/// `GET /modules[?category=]`
pub async fn list_modules(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> Json<Vec<ModuleMetadata>> {
    let registry = state.runner.registry();
    Json(match query.category.as_deref() {
        Some(category) => registry.list_by_category(category),
        None => registry.list_all(),
    })
}

/// `GET /modules/categories`
pub async fn list_categories(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.runner.registry().list_categories())
}

/// `POST /modules/:id/run`
pub async fn run_module(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<ModuleResult>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let explicit = match request.params {
        Some(params) => {
            let module = state
                .runner
                .registry()
                .get_instance(&module_id)
                .ok_or_else(|| not_found(&module_id))?;
            let mut config = state
                .runner
                .resolver()
                .resolve(&module_id, None, module.as_ref())
                .await;
            config.params.extend(params);
            Some(config)
        }
        None => None,
    };

    let result = state
        .runner
        .execute(&module_id, explicit, request.use_cache.unwrap_or(true))
        .await?;
    Ok(Json(result))
}

/// `GET /modules/:id/runs[?limit=]`
pub async fn list_runs(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunRecord>>, AppError> {
    if !state.runner.registry().contains(&module_id) {
        return Err(not_found(&module_id));
    }
    let runs = state
        .runner
        .recent_runs(Some(&module_id), query.limit.unwrap_or(DEFAULT_RUNS_LIMIT))
        .await?;
    Ok(Json(runs))
}

/// `GET /modules/:id/config`: the stored config, or the module default.
pub async fn get_config(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let module = state
        .runner
        .registry()
        .get_instance(&module_id)
        .ok_or_else(|| not_found(&module_id))?;

    let (config, stored) = match state.runner.resolver().load(&module_id).await {
        Some(config) => (config, true),
        None => (module.default_config(), false),
    };
    Ok(Json(json!({ "config": config, "stored": stored })))
}

/// `PUT /modules/:id/config`
pub async fn put_config(
    State(state): State<AppState>,
    Path(module_id): Path<String>,
    Json(config): Json<ModuleConfig>,
) -> Result<Json<ModuleConfig>, AppError> {
    if !state.runner.registry().contains(&module_id) {
        return Err(not_found(&module_id));
    }
    if config.module_id != module_id {
        return Err(AppError::BadRequest(format!(
            "module_id '{}' does not match path '{}'",
            config.module_id, module_id
        )));
    }
    if let Some(expr) = config.schedule.as_deref() {
        expr.parse::<Schedule>()
            .map_err(|err| AppError::BadRequest(err.to_string()))?;
    }
    if config.timeout_seconds == 0 {
        return Err(AppError::BadRequest("timeout_seconds must be positive".into()));
    }
    for (field, value) in [
        ("timeout_seconds", config.timeout_seconds),
        ("cache_ttl_seconds", config.cache_ttl_seconds),
    ] {
        if i64::try_from(value).is_err() {
            return Err(AppError::BadRequest(format!(
                "{} must not exceed {}",
                field,
                i64::MAX
            )));
        }
    }

    state.runner.resolver().save(&config).await?;
    Ok(Json(config))
}
