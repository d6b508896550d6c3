//! Event store, published snapshots and stats history.
//!
//! The engine and the query façade only talk to [`LedgerStore`]. ClickHouse
//! backs it in production ([`operations::ClickHouseStore`]); the in-memory
//! store keeps the same semantics for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::models::{
    EventKey, ExcludedAccount, HolderBalance, PriceRecord, PublishedSnapshot, StatsSnapshot,
    TransferEvent,
};

pub mod init;
pub mod memory;
pub mod models;
pub mod operations;
pub mod queries;
pub mod schema;

pub use memory::MemoryStore;
pub use operations::ClickHouseStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest stored block for the pool, `None` when nothing is stored.
    async fn last_block(&self, pool_id: &str) -> Result<Option<u64>, StoreError>;

    async fn event_count(&self, pool_id: &str) -> Result<u64, StoreError>;

    /// Identities of stored events with `from_block <= block_number <= to_block`,
    /// one entry per stored event.
    async fn event_keys_between(
        &self,
        pool_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventKey>, StoreError>;

    /// Appends in one batch, assigning `ingest_seq` after the pool's current
    /// maximum. Returns how many events were written.
    async fn append_events(&self, pool_id: &str, events: Vec<TransferEvent>) -> Result<u64, StoreError>;

    /// Full history ordered by `(block_number, ingest_seq)`.
    async fn load_history(&self, pool_id: &str) -> Result<Vec<TransferEvent>, StoreError>;

    /// Makes `rows` the pool's visible snapshot in a single step.
    async fn publish_snapshot(
        &self,
        pool_id: &str,
        rows: Vec<HolderBalance>,
    ) -> Result<PublishedSnapshot, StoreError>;

    async fn snapshot_info(&self, pool_id: &str) -> Result<Option<PublishedSnapshot>, StoreError>;

    /// Rows of the latest published snapshot, unordered.
    async fn current_snapshot(&self, pool_id: &str) -> Result<Vec<HolderBalance>, StoreError>;

    async fn insert_stats(&self, stats: &StatsSnapshot) -> Result<(), StoreError>;

    async fn latest_stats(&self) -> Result<Option<StatsSnapshot>, StoreError>;

    async fn stats_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatsSnapshot>, StoreError>;

    async fn insert_price(&self, price: &PriceRecord) -> Result<(), StoreError>;

    /// Latest price, restricted to a stats group when one is given.
    async fn latest_price(&self, group_id: Option<Uuid>) -> Result<Option<PriceRecord>, StoreError>;

    async fn replace_excluded_accounts(&self, accounts: &[ExcludedAccount]) -> Result<(), StoreError>;

    async fn excluded_accounts(&self) -> Result<Vec<ExcludedAccount>, StoreError>;

    /// Drops every stored event and snapshot of a pool. Test reset only.
    async fn reset_pool(&self, pool_id: &str) -> Result<(), StoreError>;
}
