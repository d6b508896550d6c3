use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Signed;
use rayon::prelude::*;

use crate::db::LedgerStore;
use crate::error::{ConsistencyError, EngineError};
use crate::services::excluded_accounts::AddressExclusionSet;
use crate::services::ledger::Ledger;
use crate::services::query::rank_holders;
use crate::types::models::{HolderBalance, PublishedSnapshot};

/// Replayed balances split into publishable rows and anomalies.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRows {
    pub rows: Vec<HolderBalance>,
    /// Non-excluded addresses that replayed to a negative balance.
    pub anomalies: Vec<(String, BigInt)>,
    pub excluded: usize,
}

impl SnapshotRows {
    pub fn build(pool_id: &str, ledger: &Ledger, exclusions: &AddressExclusionSet) -> Self {
        let excluded = ledger
            .entries()
            .keys()
            .filter(|address| exclusions.contains(address))
            .count();

        let anomalies: Vec<(String, BigInt)> = ledger
            .negative_balances()
            .filter(|(address, _)| !exclusions.contains(address))
            .map(|(address, balance)| (address.clone(), balance.clone()))
            .collect();

        let mut rows: Vec<HolderBalance> = ledger
            .entries()
            .par_iter()
            .filter(|(address, entry)| entry.balance.is_positive() && !exclusions.contains(address))
            .map(|(address, entry)| HolderBalance {
                pool_id: pool_id.to_string(),
                address: address.clone(),
                balance: entry.balance.clone(),
                first_block_number: entry.first_block_number,
                first_timestamp: entry.first_timestamp,
            })
            .collect();
        rank_holders(&mut rows);

        Self {
            rows,
            anomalies,
            excluded,
        }
    }

    pub fn consistency_error(&self, pool_id: &str) -> Option<ConsistencyError> {
        self.anomalies
            .first()
            .map(|(address, balance)| ConsistencyError::NegativeBalance {
                pool: pool_id.to_string(),
                count: self.anomalies.len(),
                address: address.clone(),
                balance: balance.clone(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub snapshot: PublishedSnapshot,
    /// Anomalous rows left out under the lenient policy.
    pub dropped_anomalies: usize,
    pub excluded: usize,
}

/// Turns a replayed ledger into the pool's visible holder table.
pub struct SnapshotPublisher {
    store: Arc<dyn LedgerStore>,
    exclusions: Arc<AddressExclusionSet>,
    strict: bool,
}

impl SnapshotPublisher {
    pub fn new(store: Arc<dyn LedgerStore>, exclusions: Arc<AddressExclusionSet>, strict: bool) -> Self {
        Self {
            store,
            exclusions,
            strict,
        }
    }

    /// Under the strict policy any anomaly withholds publication and the
    /// previous snapshot stays visible.
    pub async fn publish(&self, pool_id: &str, ledger: &Ledger) -> Result<PublishReport, EngineError> {
        let built = SnapshotRows::build(pool_id, ledger, &self.exclusions);

        for (address, balance) in &built.anomalies {
            tracing::error!(
                "pool {}: address {} replayed to negative balance {}",
                pool_id,
                address,
                balance
            );
        }
        if let Some(err) = built.consistency_error(pool_id) {
            if self.strict {
                return Err(err.into());
            }
            tracing::warn!("pool {}: publishing without {} anomalous rows", pool_id, built.anomalies.len());
        }

        let dropped_anomalies = built.anomalies.len();
        let excluded = built.excluded;
        let snapshot = self.store.publish_snapshot(pool_id, built.rows).await?;

        tracing::info!(
            "pool {}: published snapshot {} with {} holders",
            pool_id,
            snapshot.snapshot_id,
            snapshot.holder_count
        );

        Ok(PublishReport {
            snapshot,
            dropped_anomalies,
            excluded,
        })
    }
}
