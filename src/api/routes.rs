use axum::{
    routing::{get, post},
    Router,
};
use super::handlers::{
    get_all_info, get_holder_count, get_holders, get_latest_stats, get_share, get_stats_range,
    get_supply, health, telegram_webhook,
};
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/data", get(get_all_info))
        .route("/data/supply", get(get_supply))
        .route("/holders/:pool", get(get_holders))
        .route("/holders/:pool/count", get(get_holder_count))
        .route("/stats/latest", get(get_latest_stats))
        .route("/stats", get(get_stats_range))
        .route("/share", get(get_share))
        .route("/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}
