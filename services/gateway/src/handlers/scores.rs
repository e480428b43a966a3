use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use types::ids::CategoryId;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitScoreRequest {
    pub token: String,
    pub points: i64,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScopeResult {
    pub scope: String,
    pub score: i64,
    pub rank: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitScoreResponse {
    pub user_id: u64,
    pub scopes: Vec<ScopeResult>,
    /// Scopes whose live propagation is still catching up. The commit
    /// itself has already succeeded.
    pub deferred: Vec<String>,
}

/// `POST /api/v1/scores` — commit a point delta and propagate it to
/// the live boards.
pub async fn submit_score(
    State(state): State<AppState>,
    Json(request): Json<SubmitScoreRequest>,
) -> Result<Json<SubmitScoreResponse>, AppError> {
    let member = state
        .token_resolver
        .resolve(&request.token)
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".to_string()))?;

    state.rate_limiter.check_score_submission(member)?;

    let category = match request.category {
        None => None,
        Some(raw) => Some(
            CategoryId::try_new(raw)
                .ok_or_else(|| AppError::BadRequest("invalid category name".to_string()))?,
        ),
    };

    let outcome = state
        .pipeline
        .apply_score_delta(member, request.points, category)
        .await?;

    Ok(Json(SubmitScoreResponse {
        user_id: member.as_u64(),
        scopes: outcome
            .scopes
            .iter()
            .map(|s| ScopeResult {
                scope: s.scope.label(),
                score: s.new_score,
                rank: s.new_rank,
            })
            .collect(),
        deferred: outcome.deferred.iter().map(|s| s.label()).collect(),
    }))
}
