use chrono::{DateTime, Utc};
use clickhouse::Client;
use uuid::Uuid;

use super::models::{
    to_offset, HolderBalanceRecord, PublishedSnapshotRecord, TokenPriceRecord, TokenStatsRecord,
};
use crate::error::StoreError;
use crate::types::models::{HolderBalance, PriceRecord, PublishedSnapshot, StatsSnapshot};

const STATS_COLUMNS: &str = "captured_at, group_id, total_supply, team_balance, treasury_balance,
    locked_pools, locked_amounts, circulating_supply, transaction_count";

const PRICE_COLUMNS: &str = "captured_at, group_id, source,
    price_usd, price_usd_change, price_usd_change_pct,
    price_eth, price_eth_change, price_eth_change_pct,
    price_btc, price_btc_change, price_btc_change_pct,
    market_cap_usd, market_cap_usd_change, market_cap_usd_change_pct,
    volume_usd";

pub async fn latest_snapshot_pointer(
    client: &Client,
    pool_id: &str,
) -> Result<Option<PublishedSnapshot>, StoreError> {
    let pointer = client
        .query(
            "SELECT pool_id, snapshot_id, published_at, holder_count
             FROM published_snapshots
             WHERE pool_id = ?
             ORDER BY published_at DESC
             LIMIT 1",
        )
        .bind(pool_id)
        .fetch_one::<PublishedSnapshotRecord>()
        .await;

    match pointer {
        Ok(record) => Ok(Some(record.into())),
        Err(clickhouse::error::Error::RowNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn snapshot_rows(
    client: &Client,
    pool_id: &str,
    snapshot_id: Uuid,
) -> Result<Vec<HolderBalance>, StoreError> {
    let rows = client
        .query(
            "SELECT pool_id, snapshot_id, address, balance, first_block_number, first_timestamp
             FROM holder_balances
             WHERE pool_id = ? AND snapshot_id = toUUID(?)",
        )
        .bind(pool_id)
        .bind(snapshot_id.to_string())
        .fetch_all::<HolderBalanceRecord>()
        .await?;

    rows.into_iter().map(HolderBalance::try_from).collect()
}

pub async fn latest_stats(client: &Client) -> Result<Option<StatsSnapshot>, StoreError> {
    let stats = client
        .query(&format!(
            "SELECT {} FROM token_stats ORDER BY captured_at DESC LIMIT 1",
            STATS_COLUMNS
        ))
        .fetch_one::<TokenStatsRecord>()
        .await;

    match stats {
        Ok(record) => Ok(Some(record.try_into()?)),
        Err(clickhouse::error::Error::RowNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn stats_between(
    client: &Client,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<StatsSnapshot>, StoreError> {
    let rows = client
        .query(&format!(
            "SELECT {} FROM token_stats
             WHERE captured_at >= toDateTime(?, 'UTC') AND captured_at <= toDateTime(?, 'UTC')
             ORDER BY captured_at ASC",
            STATS_COLUMNS
        ))
        .bind(to_offset(from).unix_timestamp())
        .bind(to_offset(to).unix_timestamp())
        .fetch_all::<TokenStatsRecord>()
        .await?;

    rows.into_iter().map(StatsSnapshot::try_from).collect()
}

pub async fn latest_price(
    client: &Client,
    group_id: Option<Uuid>,
) -> Result<Option<PriceRecord>, StoreError> {
    let price = match group_id {
        Some(group) => {
            client
                .query(&format!(
                    "SELECT {} FROM token_prices WHERE group_id = toUUID(?)
                     ORDER BY captured_at DESC LIMIT 1",
                    PRICE_COLUMNS
                ))
                .bind(group.to_string())
                .fetch_one::<TokenPriceRecord>()
                .await
        }
        None => {
            client
                .query(&format!(
                    "SELECT {} FROM token_prices ORDER BY captured_at DESC LIMIT 1",
                    PRICE_COLUMNS
                ))
                .fetch_one::<TokenPriceRecord>()
                .await
        }
    };

    match price {
        Ok(record) => Ok(Some(record.into())),
        Err(clickhouse::error::Error::RowNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
