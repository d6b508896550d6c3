use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;
use super::telegram::Update;
use crate::services::query::{parse_decimal, ALL_INFO_HOLDERS};
use crate::types::models::{AllInfo, Freshness, HolderView, ShareOfSupply, StatsSnapshot, SupplyView};

#[derive(Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct RangeParams {
    pub from: i64,
    pub to: i64,
}

#[derive(Deserialize)]
pub struct ShareParams {
    pub amount: Option<String>,
    pub percent: Option<String>,
}

#[derive(Serialize)]
pub struct HolderCount {
    pub pool_id: String,
    pub holder_count: u64,
}

pub async fn get_all_info(State(state): State<AppState>) -> Result<Json<AllInfo>, ApiError> {
    Ok(Json(state.query.all_info(Utc::now()).await?))
}

pub async fn get_supply(State(state): State<AppState>) -> Result<Json<SupplyView>, ApiError> {
    Ok(Json(state.query.supply().await?))
}

pub async fn get_holders(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<HolderView>>, ApiError> {
    let limit = params.limit.unwrap_or(ALL_INFO_HOLDERS);
    Ok(Json(state.query.top_holders(&pool_id, limit).await?))
}

pub async fn get_holder_count(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<Json<HolderCount>, ApiError> {
    let holder_count = state.query.holder_count(&pool_id).await?;
    Ok(Json(HolderCount {
        pool_id,
        holder_count,
    }))
}

pub async fn get_latest_stats(State(state): State<AppState>) -> Result<Json<StatsSnapshot>, ApiError> {
    match state.query.latest_stats().await? {
        Some(stats) => Ok(Json(stats)),
        None => Err(ApiError::NotFound("No stats have been recorded yet".to_string())),
    }
}

fn timestamp(name: &str, secs: i64) -> Result<DateTime<Utc>, ApiError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| ApiError::BadRequest(format!("{} is not a valid unix timestamp", name)))
}

pub async fn get_stats_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<StatsSnapshot>>, ApiError> {
    let from = timestamp("from", params.from)?;
    let to = timestamp("to", params.to)?;
    if from > to {
        return Err(ApiError::BadRequest("from must not be after to".to_string()));
    }
    Ok(Json(state.query.stats_between(from, to).await?))
}

pub async fn get_share(
    State(state): State<AppState>,
    Query(params): Query<ShareParams>,
) -> Result<Json<ShareOfSupply>, ApiError> {
    let share = match (params.amount, params.percent) {
        (Some(amount), None) => state.query.share_of_amount(&parse_decimal(&amount)?).await?,
        (None, Some(percent)) => {
            let percent = percent.trim().trim_end_matches('%').to_string();
            state.query.share_of_percent(&parse_decimal(&percent)?).await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of amount or percent is required".to_string(),
            ))
        }
    };
    Ok(Json(share))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Freshness>, ApiError> {
    Ok(Json(state.query.freshness(Utc::now()).await?))
}

/// Always acknowledges the update so the Bot API does not redeliver it.
pub async fn telegram_webhook(State(state): State<AppState>, Json(update): Json<Update>) -> StatusCode {
    let Some(message) = update.message else {
        return StatusCode::OK;
    };
    let Some(text) = message.text.as_deref() else {
        return StatusCode::OK;
    };
    let Some(reply) = state.commands.dispatch(text).await else {
        return StatusCode::OK;
    };

    match &state.telegram {
        Some(telegram) => {
            if let Err(e) = telegram.send_message(message.chat.id, &reply).await {
                tracing::error!("Failed to reply to chat {}: {}", message.chat.id, e);
            }
        }
        None => tracing::warn!("Update {} answered but no bot token is configured", update.update_id),
    }
    StatusCode::OK
}
