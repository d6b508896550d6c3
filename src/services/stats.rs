use std::sync::Arc;

use chrono::Utc;
use num_bigint::BigInt;
use num_traits::Signed;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::db::LedgerStore;
use crate::error::{ConsistencyError, EngineError};
use crate::services::explorer::BalanceSource;
use crate::types::models::{PoolLocked, StatsSnapshot};

pub struct StatsCalculator {
    balances: Arc<dyn BalanceSource>,
    store: Arc<dyn LedgerStore>,
    config: Arc<LedgerConfig>,
}

impl StatsCalculator {
    pub fn new(
        balances: Arc<dyn BalanceSource>,
        store: Arc<dyn LedgerStore>,
        config: Arc<LedgerConfig>,
    ) -> Self {
        Self {
            balances,
            store,
            config,
        }
    }

    /// Reads supply and the non-circulating balances at this point in time.
    /// Nothing is stored.
    pub async fn compute_stats(&self) -> Result<StatsSnapshot, EngineError> {
        let token = &self.config.token_contract;

        let total_supply = self.balances.get_total_supply(token).await?;
        let team_balance = self.balances.get_balance(token, &self.config.team_address).await?;
        let treasury_balance = self
            .balances
            .get_balance(token, &self.config.treasury_address)
            .await?;

        let mut locked = Vec::new();
        for pool in self.config.liquidity_pools() {
            let amount = self.balances.get_balance(token, &pool.contract).await?;
            locked.push(PoolLocked {
                pool_id: pool.id.clone(),
                amount,
            });
        }

        let circulating_supply = circulating(&total_supply, &team_balance, &treasury_balance, &locked)?;
        let transaction_count = self.store.event_count(&self.config.primary_pool().id).await?;

        Ok(StatsSnapshot {
            captured_at: Utc::now(),
            group_id: Uuid::new_v4(),
            total_supply,
            team_balance,
            treasury_balance,
            locked,
            circulating_supply,
            transaction_count,
        })
    }

    pub async fn record_stats(&self) -> Result<StatsSnapshot, EngineError> {
        let stats = self.compute_stats().await?;
        self.store.insert_stats(&stats).await?;
        tracing::info!(
            "Recorded stats {}: circulating {} of {} ({} transfers)",
            stats.group_id,
            stats.circulating_supply,
            stats.total_supply,
            stats.transaction_count
        );
        Ok(stats)
    }
}

fn circulating(
    total: &BigInt,
    team: &BigInt,
    treasury: &BigInt,
    locked: &[PoolLocked],
) -> Result<BigInt, ConsistencyError> {
    let locked_total: BigInt = locked.iter().map(|l| &l.amount).sum();
    let circulating = total - team - treasury - locked_total;
    if circulating.is_negative() {
        return Err(ConsistencyError::NegativeCirculation(circulating));
    }
    Ok(circulating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolKind};
    use crate::db::MemoryStore;
    use crate::error::SourceError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedBalances {
        supply: BigInt,
        balances: HashMap<String, BigInt>,
    }

    #[async_trait]
    impl BalanceSource for FixedBalances {
        async fn get_balance(&self, _contract: &str, address: &str) -> Result<BigInt, SourceError> {
            self.balances
                .get(address)
                .cloned()
                .ok_or_else(|| SourceError::Api(format!("no balance for {}", address)))
        }

        async fn get_total_supply(&self, _contract: &str) -> Result<BigInt, SourceError> {
            Ok(self.supply.clone())
        }
    }

    fn config() -> Arc<LedgerConfig> {
        Arc::new(LedgerConfig {
            token_contract: "0xtoken".to_string(),
            token_symbol: "TKN".to_string(),
            decimals: 0,
            pools: vec![
                PoolConfig {
                    id: "primary".to_string(),
                    kind: PoolKind::Primary,
                    contract: "0xtoken".to_string(),
                    account: None,
                },
                PoolConfig {
                    id: "lp".to_string(),
                    kind: PoolKind::Liquidity,
                    contract: "0xpair".to_string(),
                    account: None,
                },
            ],
            team_address: "0xteam".to_string(),
            treasury_address: "0xtreasury".to_string(),
            mint_addresses: Vec::new(),
            extra_exclusions: Vec::new(),
            strict_consistency: true,
        })
    }

    fn calculator(supply: i64, balances: &[(&str, i64)]) -> (Arc<MemoryStore>, StatsCalculator) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FixedBalances {
            supply: BigInt::from(supply),
            balances: balances
                .iter()
                .map(|(a, b)| (a.to_string(), BigInt::from(*b)))
                .collect(),
        });
        (store.clone(), StatsCalculator::new(source, store, config()))
    }

    #[tokio::test]
    async fn circulating_excludes_team_treasury_and_locked() {
        let (store, calculator) = calculator(10_000, &[("0xteam", 1_000), ("0xtreasury", 2_000), ("0xpair", 500)]);
        let stats = calculator.record_stats().await.unwrap();

        assert_eq!(stats.circulating_supply, BigInt::from(6_500));
        assert_eq!(stats.locked.len(), 1);
        assert_eq!(stats.locked[0].pool_id, "lp");
        assert_eq!(stats.transaction_count, 0);
        assert_eq!(store.latest_stats().await.unwrap(), Some(stats));
    }

    #[tokio::test]
    async fn negative_circulation_is_withheld() {
        let (store, calculator) = calculator(1_000, &[("0xteam", 900), ("0xtreasury", 200), ("0xpair", 0)]);
        let err = calculator.record_stats().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Consistency(ConsistencyError::NegativeCirculation(_))
        ));
        assert_eq!(store.latest_stats().await.unwrap(), None);
    }

    #[tokio::test]
    async fn every_record_gets_its_own_group() {
        let (_, calculator) = calculator(10, &[("0xteam", 0), ("0xtreasury", 0), ("0xpair", 0)]);
        let first = calculator.compute_stats().await.unwrap();
        let second = calculator.compute_stats().await.unwrap();
        assert_ne!(first.group_id, second.group_id);
    }
}
