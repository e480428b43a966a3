use crate::handlers::{leaderboard, scores, ws};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/leaderboard/global", get(leaderboard::global_leaderboard))
        .route(
            "/leaderboard/category/:category",
            get(leaderboard::category_leaderboard),
        )
        .route("/leaderboard/ws/live", get(ws::ws_handler))
        .route("/scores", post(scores::submit_score))
        .route("/metrics", get(leaderboard::service_metrics));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
