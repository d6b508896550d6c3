//! Read side. Everything here works off published snapshots and the
//! stats/price history; nothing reaches the explorer.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Duration, Utc};
use num_traits::Zero;

use crate::config::LedgerConfig;
use crate::db::LedgerStore;
use crate::error::QueryError;
use crate::types::models::{
    AllInfo, Freshness, HolderBalance, HolderView, LockedView, PoolHolders, PriceRecord,
    ShareOfSupply, StatsSnapshot, SupplyView,
};
use crate::types::units::{format_amount, to_display};

pub const MAX_TOP_HOLDERS: usize = 1000;
pub const ALL_INFO_HOLDERS: usize = 100;
const PERCENT_SCALE: i64 = 8;

pub fn parse_decimal(raw: &str) -> Result<BigDecimal, QueryError> {
    let trimmed = raw.trim().replace(',', "");
    BigDecimal::from_str(&trimmed).map_err(|_| QueryError::InvalidNumber(raw.trim().to_string()))
}

/// Sorts by balance descending, ties by address ascending.
pub fn rank_holders(rows: &mut [HolderBalance]) {
    rows.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.address.cmp(&b.address)));
}

#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn LedgerStore>,
    config: Arc<LedgerConfig>,
    staleness: Duration,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn LedgerStore>, config: Arc<LedgerConfig>, staleness_minutes: i64) -> Self {
        Self {
            store,
            config,
            staleness: Duration::minutes(staleness_minutes),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn check_pool(&self, pool_id: &str) -> Result<(), QueryError> {
        match self.config.pool(pool_id) {
            Some(_) => Ok(()),
            None => Err(QueryError::UnknownPool(pool_id.to_string())),
        }
    }

    fn display(&self, raw: &num_bigint::BigInt) -> BigDecimal {
        to_display(raw, self.config.decimals)
    }

    pub async fn top_holders(&self, pool_id: &str, limit: usize) -> Result<Vec<HolderView>, QueryError> {
        self.check_pool(pool_id)?;
        let limit = limit.clamp(1, MAX_TOP_HOLDERS);

        let mut rows = self.store.current_snapshot(pool_id).await?;
        rank_holders(&mut rows);

        Ok(rows
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, row)| HolderView {
                rank: i + 1,
                amount: self.display(&row.balance),
                address: row.address,
                balance: row.balance,
                first_block_number: row.first_block_number,
                first_timestamp: row.first_timestamp,
            })
            .collect())
    }

    pub async fn holder_count(&self, pool_id: &str) -> Result<u64, QueryError> {
        self.check_pool(pool_id)?;
        Ok(self
            .store
            .snapshot_info(pool_id)
            .await?
            .map_or(0, |s| s.holder_count))
    }

    pub async fn latest_stats(&self) -> Result<Option<StatsSnapshot>, QueryError> {
        Ok(self.store.latest_stats().await?)
    }

    pub async fn stats_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatsSnapshot>, QueryError> {
        Ok(self.store.stats_between(from, to).await?)
    }

    pub async fn latest_price(&self) -> Result<Option<PriceRecord>, QueryError> {
        Ok(self.store.latest_price(None).await?)
    }

    pub fn supply_view(&self, stats: &StatsSnapshot) -> SupplyView {
        SupplyView {
            captured_at: stats.captured_at,
            total_supply: self.display(&stats.total_supply),
            circulating_supply: self.display(&stats.circulating_supply),
            team_balance: self.display(&stats.team_balance),
            treasury_balance: self.display(&stats.treasury_balance),
            locked: stats
                .locked
                .iter()
                .map(|l| LockedView {
                    pool_id: l.pool_id.clone(),
                    amount: self.display(&l.amount),
                })
                .collect(),
            transaction_count: stats.transaction_count,
        }
    }

    pub async fn supply(&self) -> Result<SupplyView, QueryError> {
        let stats = self.latest_stats().await?.ok_or(QueryError::NoStats)?;
        Ok(self.supply_view(&stats))
    }

    async fn circulating(&self) -> Result<BigDecimal, QueryError> {
        let stats = self.latest_stats().await?.ok_or(QueryError::NoStats)?;
        Ok(self.display(&stats.circulating_supply))
    }

    /// Share of circulating supply held by `amount` display units. The amount
    /// must lie strictly between zero and the circulating supply.
    pub async fn share_of_amount(&self, amount: &BigDecimal) -> Result<ShareOfSupply, QueryError> {
        let circulating = self.circulating().await?;
        if *amount <= BigDecimal::zero() || *amount >= circulating {
            return Err(QueryError::OutOfBounds {
                what: "amount",
                max: format_amount(&circulating, 2),
            });
        }
        let percent = (amount * BigDecimal::from(100) / &circulating)
            .with_scale_round(PERCENT_SCALE, RoundingMode::HalfUp);
        Ok(ShareOfSupply {
            amount: amount.clone(),
            percent,
            circulating_supply: circulating,
        })
    }

    /// Amount matching `percent` of circulating supply, `0 < percent < 100`.
    pub async fn share_of_percent(&self, percent: &BigDecimal) -> Result<ShareOfSupply, QueryError> {
        if *percent <= BigDecimal::zero() || *percent >= BigDecimal::from(100) {
            return Err(QueryError::OutOfBounds {
                what: "percent",
                max: "100".to_string(),
            });
        }
        let circulating = self.circulating().await?;
        let amount = (&circulating * percent / BigDecimal::from(100))
            .with_scale_round(self.config.decimals as i64, RoundingMode::Down);
        Ok(ShareOfSupply {
            amount,
            percent: percent.clone(),
            circulating_supply: circulating,
        })
    }

    fn is_fresh(&self, at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        at.map_or(false, |at| now - at <= self.staleness)
    }

    pub async fn freshness(&self, now: DateTime<Utc>) -> Result<Freshness, QueryError> {
        let stats_at = self.store.latest_stats().await?.map(|s| s.captured_at);
        let price_at = self.store.latest_price(None).await?.map(|p| p.captured_at);
        Ok(Freshness {
            stale: !(self.is_fresh(stats_at, now) && self.is_fresh(price_at, now)),
            stats_at,
            price_at,
            window_minutes: self.staleness.num_minutes(),
        })
    }

    pub async fn is_stale(&self, now: DateTime<Utc>) -> Result<bool, QueryError> {
        Ok(self.freshness(now).await?.stale)
    }

    pub async fn all_info(&self, now: DateTime<Utc>) -> Result<AllInfo, QueryError> {
        let stats = self.latest_stats().await?;

        // price captured in the same run as the stats, else whatever is newest
        let grouped = match &stats {
            Some(s) => self.store.latest_price(Some(s.group_id)).await?,
            None => None,
        };
        let price = match grouped {
            Some(price) => Some(price),
            None => self.store.latest_price(None).await?,
        };

        let mut pools = Vec::with_capacity(self.config.pools.len());
        for pool in &self.config.pools {
            pools.push(PoolHolders {
                pool_id: pool.id.clone(),
                holder_count: self.holder_count(&pool.id).await?,
                holders: self.top_holders(&pool.id, ALL_INFO_HOLDERS).await?,
            });
        }

        let stale = !(self.is_fresh(stats.as_ref().map(|s| s.captured_at), now)
            && self.is_fresh(price.as_ref().map(|p| p.captured_at), now));

        Ok(AllInfo {
            supply: stats.as_ref().map(|s| self.supply_view(s)),
            price,
            pools,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolKind};
    use crate::db::MemoryStore;
    use crate::types::models::{Change, PoolLocked};
    use num_bigint::BigInt;
    use uuid::Uuid;

    fn config(decimals: u32) -> Arc<LedgerConfig> {
        Arc::new(LedgerConfig {
            token_contract: "0xtoken".to_string(),
            token_symbol: "TKN".to_string(),
            decimals,
            pools: vec![PoolConfig {
                id: "primary".to_string(),
                kind: PoolKind::Primary,
                contract: "0xtoken".to_string(),
                account: None,
            }],
            team_address: "0xteam".to_string(),
            treasury_address: "0xtreasury".to_string(),
            mint_addresses: Vec::new(),
            extra_exclusions: Vec::new(),
            strict_consistency: true,
        })
    }

    fn stats(circulating: i64, captured_at: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            captured_at,
            group_id: Uuid::new_v4(),
            total_supply: BigInt::from(circulating * 2),
            team_balance: BigInt::from(circulating / 2),
            treasury_balance: BigInt::from(circulating / 2),
            locked: vec![PoolLocked {
                pool_id: "lp".to_string(),
                amount: BigInt::from(0),
            }],
            circulating_supply: BigInt::from(circulating),
            transaction_count: 3,
        }
    }

    fn price(group_id: Uuid, usd: f64, captured_at: DateTime<Utc>) -> PriceRecord {
        PriceRecord {
            captured_at,
            group_id,
            source: "coingecko".to_string(),
            price_usd: usd,
            price_usd_change: Change::Up,
            price_usd_change_pct: 1.5,
            price_eth: 0.01,
            price_eth_change: Change::None,
            price_eth_change_pct: 0.0,
            price_btc: 0.001,
            price_btc_change: Change::Down,
            price_btc_change_pct: -0.5,
            market_cap_usd: 1_000.0,
            market_cap_usd_change: Change::Up,
            market_cap_usd_change_pct: 1.5,
            volume_usd: 10.0,
        }
    }

    fn holder(address: &str, balance: i64) -> HolderBalance {
        HolderBalance {
            pool_id: "primary".to_string(),
            address: address.to_string(),
            balance: BigInt::from(balance),
            first_block_number: 1,
            first_timestamp: DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap(),
        }
    }

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn share_of_amount_within_bounds() {
        let store = Arc::new(MemoryStore::new());
        store.insert_stats(&stats(1_000, Utc::now())).await.unwrap();
        let facade = QueryFacade::new(store, config(0), 30);

        let share = facade.share_of_amount(&dec("250")).await.unwrap();
        assert_eq!(share.percent, dec("25"));

        for bad in ["1001", "1000", "0", "-5"] {
            assert!(matches!(
                facade.share_of_amount(&dec(bad)).await,
                Err(QueryError::OutOfBounds { what: "amount", .. })
            ));
        }
    }

    #[tokio::test]
    async fn share_of_percent_within_bounds() {
        let store = Arc::new(MemoryStore::new());
        store.insert_stats(&stats(1_000, Utc::now())).await.unwrap();
        let facade = QueryFacade::new(store, config(0), 30);

        let share = facade.share_of_percent(&dec("12.5")).await.unwrap();
        assert_eq!(share.amount, dec("125"));
        assert!(facade.share_of_percent(&dec("100")).await.is_err());
        assert!(facade.share_of_percent(&dec("0")).await.is_err());
    }

    #[tokio::test]
    async fn share_without_stats_fails() {
        let facade = QueryFacade::new(Arc::new(MemoryStore::new()), config(0), 30);
        assert_eq!(facade.share_of_amount(&dec("1")).await, Err(QueryError::NoStats));
    }

    #[tokio::test]
    async fn top_holders_sorted_with_address_tie_break() {
        let store = Arc::new(MemoryStore::new());
        store
            .publish_snapshot(
                "primary",
                vec![holder("0xc", 5), holder("0xb", 10), holder("0xa", 10), holder("0xd", 1)],
            )
            .await
            .unwrap();
        let facade = QueryFacade::new(store, config(0), 30);

        let top = facade.top_holders("primary", 3).await.unwrap();
        let order: Vec<_> = top.iter().map(|h| (h.rank, h.address.as_str())).collect();
        assert_eq!(order, vec![(1, "0xa"), (2, "0xb"), (3, "0xc")]);

        // clamped up to one
        assert_eq!(facade.top_holders("primary", 0).await.unwrap().len(), 1);
        assert_eq!(facade.holder_count("primary").await.unwrap(), 4);
        assert_eq!(
            facade.top_holders("nope", 10).await.unwrap_err(),
            QueryError::UnknownPool("nope".to_string())
        );
    }

    #[tokio::test]
    async fn holders_are_reported_in_display_units() {
        let store = Arc::new(MemoryStore::new());
        store
            .publish_snapshot("primary", vec![holder("0xa", 1_500_000)])
            .await
            .unwrap();
        let facade = QueryFacade::new(store, config(6), 30);
        let top = facade.top_holders("primary", 10).await.unwrap();
        assert_eq!(top[0].amount, dec("1.5"));
    }

    #[tokio::test]
    async fn staleness_needs_both_stats_and_price() {
        let store = Arc::new(MemoryStore::new());
        let facade = QueryFacade::new(store.clone(), config(0), 30);
        let now = Utc::now();
        assert!(facade.is_stale(now).await.unwrap());

        let recent = stats(1_000, now - Duration::minutes(5));
        store.insert_stats(&recent).await.unwrap();
        assert!(facade.is_stale(now).await.unwrap());

        store
            .insert_price(&price(recent.group_id, 1.0, now - Duration::minutes(5)))
            .await
            .unwrap();
        assert!(!facade.is_stale(now).await.unwrap());

        assert!(facade.is_stale(now + Duration::minutes(31)).await.unwrap());
    }

    #[tokio::test]
    async fn all_info_joins_price_by_group() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let old = stats(1_000, now - Duration::minutes(20));
        let current = stats(2_000, now - Duration::minutes(1));
        store.insert_stats(&old).await.unwrap();
        store.insert_price(&price(old.group_id, 1.0, now - Duration::minutes(19))).await.unwrap();
        store.insert_stats(&current).await.unwrap();
        store.insert_price(&price(current.group_id, 2.0, now - Duration::minutes(1))).await.unwrap();
        store.publish_snapshot("primary", vec![holder("0xa", 7)]).await.unwrap();

        let facade = QueryFacade::new(store, config(0), 30);
        let info = facade.all_info(now).await.unwrap();
        assert_eq!(info.price.map(|p| p.price_usd), Some(2.0));
        assert_eq!(info.supply.map(|s| s.circulating_supply), Some(dec("2000")));
        assert_eq!(info.pools.len(), 1);
        assert_eq!(info.pools[0].holder_count, 1);
        assert!(!info.stale);
    }
}
