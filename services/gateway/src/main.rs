mod auth;
mod error;
mod handlers;
mod rate_limit;
mod router;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use auth::StaticTokenResolver;
use router::create_router;
use state::{AppState, GatewayConfig};
use store::InMemoryScoreStore;
use types::ids::{CategoryId, MemberId};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting leaderboard gateway");

    let categories = configured_categories()?;
    tracing::info!(?categories, "configured category boards");

    // Development wiring: process-local durable store and a static
    // token table. Production swaps both collaborators.
    let store = Arc::new(InMemoryScoreStore::new());
    let resolver = Arc::new(StaticTokenResolver::new());
    if let Ok(raw) = std::env::var("DEV_TOKENS") {
        for (token, member) in parse_dev_tokens(&raw) {
            resolver.insert(token, member);
        }
    }

    let state = AppState::new(store, categories, resolver, GatewayConfig::default());

    // The in-memory index is derived state; rebuild it before serving.
    state.pipeline.rebuild_indexes().await?;

    let app = create_router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080u16);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn configured_categories() -> Result<Vec<CategoryId>, anyhow::Error> {
    let raw = std::env::var("LEADERBOARD_CATEGORIES")
        .unwrap_or_else(|_| "math,logic,word".to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            CategoryId::try_new(name)
                .ok_or_else(|| anyhow::anyhow!("invalid category name: {name}"))
        })
        .collect()
}

/// `DEV_TOKENS=token1:1,token2:2` issues tokens for local testing.
fn parse_dev_tokens(raw: &str) -> Vec<(String, MemberId)> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, id) = pair.split_once(':')?;
            let id = id.trim().parse().ok()?;
            Some((token.trim().to_string(), MemberId::new(id)))
        })
        .collect()
}
