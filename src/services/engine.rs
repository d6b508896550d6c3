use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use num_traits::Zero;
use tokio::sync::Mutex;

use crate::config::{LedgerConfig, PoolConfig};
use crate::db::LedgerStore;
use crate::error::{ConsistencyError, EngineError};
use crate::services::excluded_accounts::AddressExclusionSet;
use crate::services::explorer::{BalanceSource, TransferSource};
use crate::services::fetcher::{FetchOutcome, IncrementalFetcher};
use crate::services::ledger::replay;
use crate::services::prices::{record_price, PriceSource};
use crate::services::snapshot::{PublishReport, SnapshotPublisher};
use crate::services::stats::StatsCalculator;
use crate::types::models::{PriceRecord, StatsSnapshot};

#[derive(Debug)]
pub enum PoolStatus {
    Published {
        fetched: FetchOutcome,
        report: PublishReport,
    },
    /// Consistency fault; the previous snapshot stays visible.
    Withheld(ConsistencyError),
    /// Transient failure; retried from the same cursor next cycle.
    Skipped(String),
}

#[derive(Debug)]
pub struct PoolReport {
    pub pool_id: String,
    pub status: PoolStatus,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub pools: Vec<PoolReport>,
    pub stats: Option<StatsSnapshot>,
    pub price: Option<PriceRecord>,
}

impl CycleReport {
    pub fn published(&self) -> usize {
        self.pools
            .iter()
            .filter(|p| matches!(p.status, PoolStatus::Published { .. }))
            .count()
    }

    pub fn pool(&self, pool_id: &str) -> Option<&PoolStatus> {
        self.pools.iter().find(|p| p.pool_id == pool_id).map(|p| &p.status)
    }
}

/// Runs fetch -> replay -> publish for every pool, then stats and price.
pub struct MaterializationEngine {
    config: Arc<LedgerConfig>,
    store: Arc<dyn LedgerStore>,
    fetcher: IncrementalFetcher,
    publisher: SnapshotPublisher,
    stats: StatsCalculator,
    prices: Option<Arc<dyn PriceSource>>,
    pool_locks: HashMap<String, Arc<Mutex<()>>>,
    max_concurrent_pools: usize,
}

impl MaterializationEngine {
    pub fn new(
        config: Arc<LedgerConfig>,
        store: Arc<dyn LedgerStore>,
        transfers: Arc<dyn TransferSource>,
        balances: Arc<dyn BalanceSource>,
        exclusions: Arc<AddressExclusionSet>,
        max_concurrent_pools: usize,
    ) -> Self {
        let pool_locks = config
            .pools
            .iter()
            .map(|p| (p.id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            fetcher: IncrementalFetcher::new(transfers, store.clone()),
            publisher: SnapshotPublisher::new(store.clone(), exclusions, config.strict_consistency),
            stats: StatsCalculator::new(balances, store.clone(), config.clone()),
            prices: None,
            pool_locks,
            max_concurrent_pools: max_concurrent_pools.max(1),
            config,
            store,
        }
    }

    pub fn with_prices(mut self, prices: Arc<dyn PriceSource>) -> Self {
        self.prices = Some(prices);
        self
    }

    /// One pool, start to finish. Cycles on the same pool never overlap.
    pub async fn materialize_pool(&self, pool: &PoolConfig) -> Result<(FetchOutcome, PublishReport), EngineError> {
        let lock = self
            .pool_locks
            .get(&pool.id)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())));
        let _guard = lock.lock().await;

        let fetched = self.fetcher.fetch_new_events(pool).await?;

        let history = self.store.load_history(&pool.id).await?;
        let ledger = replay(&history);
        let total = ledger.total();
        if !total.is_zero() {
            tracing::error!("pool {}: replayed balances sum to {} instead of zero", pool.id, total);
        }
        tracing::info!(
            "pool {}: replayed {} events over {} addresses",
            pool.id,
            ledger.applied_events(),
            ledger.len()
        );

        let report = self.publisher.publish(&pool.id, &ledger).await?;
        Ok((fetched, report))
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        tracing::info!("Starting materialization cycle for {} pools", self.config.pools.len());

        let futures: Vec<_> = self
            .config
            .pools
            .iter()
            .map(|pool| async move { (pool.id.clone(), self.materialize_pool(pool).await) })
            .collect();

        let results: Vec<_> = stream::iter(futures)
            .buffer_unordered(self.max_concurrent_pools)
            .collect()
            .await;

        let mut report = CycleReport::default();
        let mut fatal = None;
        for (pool_id, result) in results {
            let status = match result {
                Ok((fetched, published)) => PoolStatus::Published {
                    fetched,
                    report: published,
                },
                Err(EngineError::Consistency(e)) => {
                    tracing::error!("pool {}: publication withheld: {}", pool_id, e);
                    PoolStatus::Withheld(e)
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("pool {}: {}", pool_id, e);
                    fatal.get_or_insert(e);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("pool {}: skipped this cycle: {}", pool_id, e);
                    PoolStatus::Skipped(e.to_string())
                }
            };
            report.pools.push(PoolReport { pool_id, status });
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        report
            .pools
            .sort_by_key(|p| self.config.pools.iter().position(|c| c.id == p.pool_id));

        report.stats = match self.stats.record_stats().await {
            Ok(stats) => Some(stats),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Stats not recorded this cycle: {}", e);
                None
            }
        };

        if let (Some(stats), Some(prices)) = (&report.stats, &self.prices) {
            report.price = match record_price(prices.as_ref(), self.store.as_ref(), stats.group_id).await {
                Ok(price) => Some(price),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Price not recorded this cycle: {}", e);
                    None
                }
            };
        }

        tracing::info!(
            "Cycle finished: {}/{} pools published, stats {}",
            report.published(),
            self.config.pools.len(),
            if report.stats.is_some() { "recorded" } else { "skipped" }
        );
        Ok(report)
    }
}
