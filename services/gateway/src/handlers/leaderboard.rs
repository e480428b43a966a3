use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use leaderboard::events::LeaderboardRow;
use leaderboard::metrics::MetricsSnapshot;
use types::ids::CategoryId;
use types::scope::Scope;

use crate::error::AppError;
use crate::state::AppState;

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `GET /api/v1/leaderboard/global?skip&limit`
pub async fn global_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<LeaderboardRow>>, AppError> {
    let view = state
        .reader
        .top_n(Scope::Global, params.skip, params.limit)
        .await?;
    Ok(Json(view.as_ref().clone()))
}

/// `GET /api/v1/leaderboard/category/:category?skip&limit`
pub async fn category_leaderboard(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<LeaderboardRow>>, AppError> {
    let category = CategoryId::try_new(category)
        .ok_or_else(|| AppError::BadRequest("invalid category name".to_string()))?;
    let scope = Scope::Category(category.clone());
    if !state.ranking.has_scope(&scope) {
        return Err(AppError::NotFound(format!("category {}", category)));
    }

    let view = state.reader.top_n(scope, params.skip, params.limit).await?;
    Ok(Json(view.as_ref().clone()))
}

/// `GET /api/v1/metrics` — counters for dashboards and tests.
pub async fn service_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
