use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::units::bigint_string;

/// One token transfer as stored in the event log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub pool_id: String,
    pub block_number: u64,
    /// Per-pool ingestion order, breaks ties inside a block.
    pub ingest_seq: u64,
    pub tx_hash: String,
    pub log_index: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub raw_value: BigInt,
}

impl TransferEvent {
    pub fn is_self_transfer(&self) -> bool {
        self.from_address == self.to_address
    }

    /// Identity used to drop duplicate deliveries of the same log entry.
    pub fn identity(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
            from_address: self.from_address.clone(),
            to_address: self.to_address.clone(),
            raw_value: self.raw_value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub tx_hash: String,
    pub log_index: Option<u64>,
    pub from_address: String,
    pub to_address: String,
    pub raw_value: BigInt,
}

/// A published snapshot row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub pool_id: String,
    pub address: String,
    #[serde(with = "bigint_string")]
    pub balance: BigInt,
    pub first_block_number: u64,
    pub first_timestamp: DateTime<Utc>,
}

/// Pointer that makes a snapshot visible to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedSnapshot {
    pub pool_id: String,
    pub snapshot_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub holder_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLocked {
    pub pool_id: String,
    #[serde(with = "bigint_string")]
    pub amount: BigInt,
}

/// Point-in-time supply figures, in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub group_id: Uuid,
    #[serde(with = "bigint_string")]
    pub total_supply: BigInt,
    #[serde(with = "bigint_string")]
    pub team_balance: BigInt,
    #[serde(with = "bigint_string")]
    pub treasury_balance: BigInt,
    pub locked: Vec<PoolLocked>,
    #[serde(with = "bigint_string")]
    pub circulating_supply: BigInt,
    pub transaction_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    None,
    Down,
    Up,
}

impl Change {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Change::Up
        } else if delta < 0.0 {
            Change::Down
        } else {
            Change::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Change::None => "none",
            Change::Down => "down",
            Change::Up => "up",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "up" => Change::Up,
            "down" => Change::Down,
            _ => Change::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub captured_at: DateTime<Utc>,
    pub group_id: Uuid,
    pub source: String,
    pub price_usd: f64,
    pub price_usd_change: Change,
    pub price_usd_change_pct: f64,
    pub price_eth: f64,
    pub price_eth_change: Change,
    pub price_eth_change_pct: f64,
    pub price_btc: f64,
    pub price_btc_change: Change,
    pub price_btc_change_pct: f64,
    pub market_cap_usd: f64,
    pub market_cap_usd_change: Change,
    pub market_cap_usd_change_pct: f64,
    pub volume_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionCategory {
    Team,
    Treasury,
    Contract,
    Mint,
    Configured,
}

impl ExclusionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionCategory::Team => "team",
            ExclusionCategory::Treasury => "treasury",
            ExclusionCategory::Contract => "contract",
            ExclusionCategory::Mint => "mint",
            ExclusionCategory::Configured => "configured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedAccount {
    pub address: String,
    pub category: ExclusionCategory,
    pub description: String,
}

// API views

#[derive(Debug, Clone, Serialize)]
pub struct HolderView {
    pub rank: usize,
    pub address: String,
    #[serde(with = "bigint_string")]
    pub balance: BigInt,
    pub amount: BigDecimal,
    pub first_block_number: u64,
    pub first_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplyView {
    pub captured_at: DateTime<Utc>,
    pub total_supply: BigDecimal,
    pub circulating_supply: BigDecimal,
    pub team_balance: BigDecimal,
    pub treasury_balance: BigDecimal,
    pub locked: Vec<LockedView>,
    pub transaction_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockedView {
    pub pool_id: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareOfSupply {
    pub amount: BigDecimal,
    pub percent: BigDecimal,
    pub circulating_supply: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHolders {
    pub pool_id: String,
    pub holder_count: u64,
    pub holders: Vec<HolderView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllInfo {
    pub supply: Option<SupplyView>,
    pub price: Option<PriceRecord>,
    pub pools: Vec<PoolHolders>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Freshness {
    pub stale: bool,
    pub stats_at: Option<DateTime<Utc>>,
    pub price_at: Option<DateTime<Utc>>,
    pub window_minutes: i64,
}
