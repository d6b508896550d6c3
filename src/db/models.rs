use chrono::{DateTime, Utc};
use clickhouse::Row;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::models::{
    Change, ExcludedAccount, ExclusionCategory, HolderBalance, PoolLocked, PriceRecord,
    PublishedSnapshot, StatsSnapshot, TransferEvent,
};

pub fn to_offset(dt: DateTime<Utc>) -> OffsetDateTime {
    let nanos = dt.timestamp_nanos_opt().unwrap_or_default() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub fn from_offset(dt: OffsetDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()).unwrap_or_default()
}

fn parse_bigint(table: &'static str, column: &'static str, raw: &str) -> Result<BigInt, StoreError> {
    raw.parse::<BigInt>().map_err(|_| StoreError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TransferEventRecord {
    pub pool_id: String,
    pub block_number: u64,
    pub ingest_seq: u64,
    pub tx_hash: String,
    pub log_index: Option<u64>,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub timestamp: OffsetDateTime,
    pub from_address: String,
    pub to_address: String,
    pub raw_value: String,
}

impl From<&TransferEvent> for TransferEventRecord {
    fn from(e: &TransferEvent) -> Self {
        Self {
            pool_id: e.pool_id.clone(),
            block_number: e.block_number,
            ingest_seq: e.ingest_seq,
            tx_hash: e.tx_hash.clone(),
            log_index: e.log_index,
            timestamp: to_offset(e.timestamp),
            from_address: e.from_address.clone(),
            to_address: e.to_address.clone(),
            raw_value: e.raw_value.to_string(),
        }
    }
}

impl TryFrom<TransferEventRecord> for TransferEvent {
    type Error = StoreError;

    fn try_from(r: TransferEventRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            raw_value: parse_bigint("transfer_events", "raw_value", &r.raw_value)?,
            pool_id: r.pool_id,
            block_number: r.block_number,
            ingest_seq: r.ingest_seq,
            tx_hash: r.tx_hash,
            log_index: r.log_index,
            timestamp: from_offset(r.timestamp),
            from_address: r.from_address,
            to_address: r.to_address,
        })
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct HolderBalanceRecord {
    pub pool_id: String,
    #[serde(with = "clickhouse::serde::uuid")]
    pub snapshot_id: Uuid,
    pub address: String,
    pub balance: String,
    pub first_block_number: u64,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub first_timestamp: OffsetDateTime,
}

impl HolderBalanceRecord {
    pub fn new(snapshot_id: Uuid, h: &HolderBalance) -> Self {
        Self {
            pool_id: h.pool_id.clone(),
            snapshot_id,
            address: h.address.clone(),
            balance: h.balance.to_string(),
            first_block_number: h.first_block_number,
            first_timestamp: to_offset(h.first_timestamp),
        }
    }
}

impl TryFrom<HolderBalanceRecord> for HolderBalance {
    type Error = StoreError;

    fn try_from(r: HolderBalanceRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            balance: parse_bigint("holder_balances", "balance", &r.balance)?,
            pool_id: r.pool_id,
            address: r.address,
            first_block_number: r.first_block_number,
            first_timestamp: from_offset(r.first_timestamp),
        })
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct PublishedSnapshotRecord {
    pub pool_id: String,
    #[serde(with = "clickhouse::serde::uuid")]
    pub snapshot_id: Uuid,
    #[serde(with = "clickhouse::serde::time::datetime64::micros")]
    pub published_at: OffsetDateTime,
    pub holder_count: u64,
}

impl From<&PublishedSnapshot> for PublishedSnapshotRecord {
    fn from(p: &PublishedSnapshot) -> Self {
        Self {
            pool_id: p.pool_id.clone(),
            snapshot_id: p.snapshot_id,
            published_at: to_offset(p.published_at),
            holder_count: p.holder_count,
        }
    }
}

impl From<PublishedSnapshotRecord> for PublishedSnapshot {
    fn from(r: PublishedSnapshotRecord) -> Self {
        Self {
            pool_id: r.pool_id,
            snapshot_id: r.snapshot_id,
            published_at: from_offset(r.published_at),
            holder_count: r.holder_count,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TokenStatsRecord {
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub captured_at: OffsetDateTime,
    #[serde(with = "clickhouse::serde::uuid")]
    pub group_id: Uuid,
    pub total_supply: String,
    pub team_balance: String,
    pub treasury_balance: String,
    pub locked_pools: Vec<String>,
    pub locked_amounts: Vec<String>,
    pub circulating_supply: String,
    pub transaction_count: u64,
}

impl From<&StatsSnapshot> for TokenStatsRecord {
    fn from(s: &StatsSnapshot) -> Self {
        Self {
            captured_at: to_offset(s.captured_at),
            group_id: s.group_id,
            total_supply: s.total_supply.to_string(),
            team_balance: s.team_balance.to_string(),
            treasury_balance: s.treasury_balance.to_string(),
            locked_pools: s.locked.iter().map(|l| l.pool_id.clone()).collect(),
            locked_amounts: s.locked.iter().map(|l| l.amount.to_string()).collect(),
            circulating_supply: s.circulating_supply.to_string(),
            transaction_count: s.transaction_count,
        }
    }
}

impl TryFrom<TokenStatsRecord> for StatsSnapshot {
    type Error = StoreError;

    fn try_from(r: TokenStatsRecord) -> Result<Self, Self::Error> {
        let locked = r
            .locked_pools
            .into_iter()
            .zip(r.locked_amounts.iter())
            .map(|(pool_id, amount)| {
                Ok(PoolLocked {
                    pool_id,
                    amount: parse_bigint("token_stats", "locked_amounts", amount)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Self {
            captured_at: from_offset(r.captured_at),
            group_id: r.group_id,
            total_supply: parse_bigint("token_stats", "total_supply", &r.total_supply)?,
            team_balance: parse_bigint("token_stats", "team_balance", &r.team_balance)?,
            treasury_balance: parse_bigint("token_stats", "treasury_balance", &r.treasury_balance)?,
            locked,
            circulating_supply: parse_bigint("token_stats", "circulating_supply", &r.circulating_supply)?,
            transaction_count: r.transaction_count,
        })
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TokenPriceRecord {
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub captured_at: OffsetDateTime,
    #[serde(with = "clickhouse::serde::uuid")]
    pub group_id: Uuid,
    pub source: String,
    pub price_usd: f64,
    pub price_usd_change: String,
    pub price_usd_change_pct: f64,
    pub price_eth: f64,
    pub price_eth_change: String,
    pub price_eth_change_pct: f64,
    pub price_btc: f64,
    pub price_btc_change: String,
    pub price_btc_change_pct: f64,
    pub market_cap_usd: f64,
    pub market_cap_usd_change: String,
    pub market_cap_usd_change_pct: f64,
    pub volume_usd: f64,
}

impl From<&PriceRecord> for TokenPriceRecord {
    fn from(p: &PriceRecord) -> Self {
        Self {
            captured_at: to_offset(p.captured_at),
            group_id: p.group_id,
            source: p.source.clone(),
            price_usd: p.price_usd,
            price_usd_change: p.price_usd_change.as_str().to_string(),
            price_usd_change_pct: p.price_usd_change_pct,
            price_eth: p.price_eth,
            price_eth_change: p.price_eth_change.as_str().to_string(),
            price_eth_change_pct: p.price_eth_change_pct,
            price_btc: p.price_btc,
            price_btc_change: p.price_btc_change.as_str().to_string(),
            price_btc_change_pct: p.price_btc_change_pct,
            market_cap_usd: p.market_cap_usd,
            market_cap_usd_change: p.market_cap_usd_change.as_str().to_string(),
            market_cap_usd_change_pct: p.market_cap_usd_change_pct,
            volume_usd: p.volume_usd,
        }
    }
}

impl From<TokenPriceRecord> for PriceRecord {
    fn from(r: TokenPriceRecord) -> Self {
        Self {
            captured_at: from_offset(r.captured_at),
            group_id: r.group_id,
            source: r.source,
            price_usd: r.price_usd,
            price_usd_change: Change::parse(&r.price_usd_change),
            price_usd_change_pct: r.price_usd_change_pct,
            price_eth: r.price_eth,
            price_eth_change: Change::parse(&r.price_eth_change),
            price_eth_change_pct: r.price_eth_change_pct,
            price_btc: r.price_btc,
            price_btc_change: Change::parse(&r.price_btc_change),
            price_btc_change_pct: r.price_btc_change_pct,
            market_cap_usd: r.market_cap_usd,
            market_cap_usd_change: Change::parse(&r.market_cap_usd_change),
            market_cap_usd_change_pct: r.market_cap_usd_change_pct,
            volume_usd: r.volume_usd,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct ExcludedAccountRecord {
    pub address: String,
    pub category: String,
    pub description: String,
}

impl From<&ExcludedAccount> for ExcludedAccountRecord {
    fn from(a: &ExcludedAccount) -> Self {
        Self {
            address: a.address.clone(),
            category: a.category.as_str().to_string(),
            description: a.description.clone(),
        }
    }
}

impl From<ExcludedAccountRecord> for ExcludedAccount {
    fn from(r: ExcludedAccountRecord) -> Self {
        let category = match r.category.as_str() {
            "team" => ExclusionCategory::Team,
            "treasury" => ExclusionCategory::Treasury,
            "contract" => ExclusionCategory::Contract,
            "mint" => ExclusionCategory::Mint,
            _ => ExclusionCategory::Configured,
        };
        Self {
            address: r.address,
            category,
            description: r.description,
        }
    }
}
