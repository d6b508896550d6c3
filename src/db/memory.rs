use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::LedgerStore;
use crate::error::StoreError;
use crate::types::models::{
    EventKey, ExcludedAccount, HolderBalance, PriceRecord, PublishedSnapshot, StatsSnapshot,
    TransferEvent,
};

#[derive(Default)]
struct State {
    events: HashMap<String, Vec<TransferEvent>>,
    snapshots: HashMap<String, (PublishedSnapshot, Vec<HolderBalance>)>,
    stats: Vec<StatsSnapshot>,
    prices: Vec<PriceRecord>,
    excluded: Vec<ExcludedAccount>,
}

/// In-process [`LedgerStore`]. Same ordering and visibility rules as the
/// ClickHouse store; `set_unavailable` simulates an outage.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn last_block(&self, pool_id: &str) -> Result<Option<u64>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .events
            .get(pool_id)
            .and_then(|events| events.iter().map(|e| e.block_number).max()))
    }

    async fn event_count(&self, pool_id: &str) -> Result<u64, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.events.get(pool_id).map_or(0, |events| events.len() as u64))
    }

    async fn event_keys_between(
        &self,
        pool_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventKey>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .events
            .get(pool_id)
            .into_iter()
            .flatten()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .map(TransferEvent::identity)
            .collect())
    }

    async fn append_events(&self, pool_id: &str, events: Vec<TransferEvent>) -> Result<u64, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state.events.entry(pool_id.to_string()).or_default();
        let first_seq = stored.iter().map(|e| e.ingest_seq + 1).max().unwrap_or(0);
        let count = events.len() as u64;
        for (offset, mut event) in events.into_iter().enumerate() {
            event.pool_id = pool_id.to_string();
            event.ingest_seq = first_seq + offset as u64;
            stored.push(event);
        }
        Ok(count)
    }

    async fn load_history(&self, pool_id: &str) -> Result<Vec<TransferEvent>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut history = state.events.get(pool_id).cloned().unwrap_or_default();
        history.sort_by_key(|e| (e.block_number, e.ingest_seq));
        Ok(history)
    }

    async fn publish_snapshot(
        &self,
        pool_id: &str,
        rows: Vec<HolderBalance>,
    ) -> Result<PublishedSnapshot, StoreError> {
        self.check()?;
        let snapshot = PublishedSnapshot {
            pool_id: pool_id.to_string(),
            snapshot_id: Uuid::new_v4(),
            published_at: Utc::now(),
            holder_count: rows.len() as u64,
        };
        let mut state = self.state.write().await;
        state
            .snapshots
            .insert(pool_id.to_string(), (snapshot.clone(), rows));
        Ok(snapshot)
    }

    async fn snapshot_info(&self, pool_id: &str) -> Result<Option<PublishedSnapshot>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.snapshots.get(pool_id).map(|(info, _)| info.clone()))
    }

    async fn current_snapshot(&self, pool_id: &str) -> Result<Vec<HolderBalance>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .get(pool_id)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn insert_stats(&self, stats: &StatsSnapshot) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.stats.push(stats.clone());
        Ok(())
    }

    async fn latest_stats(&self) -> Result<Option<StatsSnapshot>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.stats.iter().max_by_key(|s| s.captured_at).cloned())
    }

    async fn stats_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatsSnapshot>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut stats: Vec<_> = state
            .stats
            .iter()
            .filter(|s| s.captured_at >= from && s.captured_at <= to)
            .cloned()
            .collect();
        stats.sort_by_key(|s| s.captured_at);
        Ok(stats)
    }

    async fn insert_price(&self, price: &PriceRecord) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.prices.push(price.clone());
        Ok(())
    }

    async fn latest_price(&self, group_id: Option<Uuid>) -> Result<Option<PriceRecord>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .prices
            .iter()
            .filter(|p| group_id.map_or(true, |g| p.group_id == g))
            .max_by_key(|p| p.captured_at)
            .cloned())
    }

    async fn replace_excluded_accounts(&self, accounts: &[ExcludedAccount]) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().await.excluded = accounts.to_vec();
        Ok(())
    }

    async fn excluded_accounts(&self) -> Result<Vec<ExcludedAccount>, StoreError> {
        self.check()?;
        let mut accounts = self.state.read().await.excluded.clone();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(accounts)
    }

    async fn reset_pool(&self, pool_id: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.events.remove(pool_id);
        state.snapshots.remove(pool_id);
        Ok(())
    }
}
