use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Client;
use uuid::Uuid;

use super::models::{
    ExcludedAccountRecord, HolderBalanceRecord, PublishedSnapshotRecord, TokenPriceRecord,
    TokenStatsRecord, TransferEventRecord,
};
use super::{queries, LedgerStore};
use crate::error::StoreError;
use crate::types::models::{
    EventKey, ExcludedAccount, HolderBalance, PriceRecord, PublishedSnapshot, StatsSnapshot,
    TransferEvent,
};

#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn next_ingest_seq(&self, pool_id: &str) -> Result<u64, StoreError> {
        let (count, max_seq) = self
            .client
            .query("SELECT count(), max(ingest_seq) FROM transfer_events WHERE pool_id = ?")
            .bind(pool_id)
            .fetch_one::<(u64, u64)>()
            .await?;
        Ok(if count == 0 { 0 } else { max_seq + 1 })
    }

    /// Old snapshot rows are invisible once the pointer moved, so a failed
    /// cleanup only costs disk space until the next cycle.
    async fn drop_superseded(&self, pool_id: &str, keep: Uuid) {
        let result = self
            .client
            .query("ALTER TABLE holder_balances DELETE WHERE pool_id = ? AND snapshot_id != toUUID(?)")
            .bind(pool_id)
            .bind(keep.to_string())
            .execute()
            .await;
        if let Err(e) = result {
            tracing::warn!("Failed to drop superseded snapshots for {}: {}", pool_id, e);
        }
    }
}

#[async_trait]
impl LedgerStore for ClickHouseStore {
    async fn last_block(&self, pool_id: &str) -> Result<Option<u64>, StoreError> {
        let (count, max_block) = self
            .client
            .query("SELECT count(), max(block_number) FROM transfer_events WHERE pool_id = ?")
            .bind(pool_id)
            .fetch_one::<(u64, u64)>()
            .await?;
        Ok((count > 0).then_some(max_block))
    }

    async fn event_count(&self, pool_id: &str) -> Result<u64, StoreError> {
        let count = self
            .client
            .query("SELECT count() FROM transfer_events WHERE pool_id = ?")
            .bind(pool_id)
            .fetch_one::<u64>()
            .await?;
        Ok(count)
    }

    async fn event_keys_between(
        &self,
        pool_id: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventKey>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT pool_id, block_number, ingest_seq, tx_hash, log_index, timestamp,
                        from_address, to_address, raw_value
                 FROM transfer_events
                 WHERE pool_id = ? AND block_number >= ? AND block_number <= ?",
            )
            .bind(pool_id)
            .bind(from_block)
            .bind(to_block)
            .fetch_all::<TransferEventRecord>()
            .await?;

        rows.into_iter()
            .map(|r| TransferEvent::try_from(r).map(|e| e.identity()))
            .collect()
    }

    async fn append_events(&self, pool_id: &str, events: Vec<TransferEvent>) -> Result<u64, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let first_seq = self.next_ingest_seq(pool_id).await?;

        // One INSERT is one block for ClickHouse: either every row of the
        // batch lands or none does.
        let mut insert = self.client.insert("transfer_events")?;
        for (offset, event) in events.iter().enumerate() {
            let mut record = TransferEventRecord::from(event);
            record.pool_id = pool_id.to_string();
            record.ingest_seq = first_seq + offset as u64;
            insert.write(&record).await?;
        }
        insert.end().await?;

        Ok(events.len() as u64)
    }

    async fn load_history(&self, pool_id: &str) -> Result<Vec<TransferEvent>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT pool_id, block_number, ingest_seq, tx_hash, log_index, timestamp,
                        from_address, to_address, raw_value
                 FROM transfer_events
                 WHERE pool_id = ?
                 ORDER BY block_number ASC, ingest_seq ASC",
            )
            .bind(pool_id)
            .fetch_all::<TransferEventRecord>()
            .await?;

        rows.into_iter().map(TransferEvent::try_from).collect()
    }

    async fn publish_snapshot(
        &self,
        pool_id: &str,
        rows: Vec<HolderBalance>,
    ) -> Result<PublishedSnapshot, StoreError> {
        let snapshot = PublishedSnapshot {
            pool_id: pool_id.to_string(),
            snapshot_id: Uuid::new_v4(),
            published_at: Utc::now(),
            holder_count: rows.len() as u64,
        };

        // Rows go in under a fresh id first; nobody reads them until the
        // pointer row below exists.
        if !rows.is_empty() {
            let mut insert = self.client.insert("holder_balances")?;
            for row in &rows {
                insert
                    .write(&HolderBalanceRecord::new(snapshot.snapshot_id, row))
                    .await?;
            }
            insert.end().await?;
        }

        let mut pointer = self.client.insert("published_snapshots")?;
        pointer.write(&PublishedSnapshotRecord::from(&snapshot)).await?;
        pointer.end().await?;

        self.drop_superseded(pool_id, snapshot.snapshot_id).await;

        Ok(snapshot)
    }

    async fn snapshot_info(&self, pool_id: &str) -> Result<Option<PublishedSnapshot>, StoreError> {
        queries::latest_snapshot_pointer(&self.client, pool_id).await
    }

    async fn current_snapshot(&self, pool_id: &str) -> Result<Vec<HolderBalance>, StoreError> {
        match queries::latest_snapshot_pointer(&self.client, pool_id).await? {
            Some(pointer) => queries::snapshot_rows(&self.client, pool_id, pointer.snapshot_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn insert_stats(&self, stats: &StatsSnapshot) -> Result<(), StoreError> {
        let mut insert = self.client.insert("token_stats")?;
        insert.write(&TokenStatsRecord::from(stats)).await?;
        insert.end().await?;
        Ok(())
    }

    async fn latest_stats(&self) -> Result<Option<StatsSnapshot>, StoreError> {
        queries::latest_stats(&self.client).await
    }

    async fn stats_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatsSnapshot>, StoreError> {
        queries::stats_between(&self.client, from, to).await
    }

    async fn insert_price(&self, price: &PriceRecord) -> Result<(), StoreError> {
        let mut insert = self.client.insert("token_prices")?;
        insert.write(&TokenPriceRecord::from(price)).await?;
        insert.end().await?;
        Ok(())
    }

    async fn latest_price(&self, group_id: Option<Uuid>) -> Result<Option<PriceRecord>, StoreError> {
        queries::latest_price(&self.client, group_id).await
    }

    async fn replace_excluded_accounts(&self, accounts: &[ExcludedAccount]) -> Result<(), StoreError> {
        self.client
            .query("TRUNCATE TABLE IF EXISTS excluded_accounts")
            .execute()
            .await?;
        if accounts.is_empty() {
            return Ok(());
        }
        let mut insert = self.client.insert("excluded_accounts")?;
        for account in accounts {
            insert.write(&ExcludedAccountRecord::from(account)).await?;
        }
        insert.end().await?;
        Ok(())
    }

    async fn excluded_accounts(&self) -> Result<Vec<ExcludedAccount>, StoreError> {
        let rows = self
            .client
            .query("SELECT address, category, description FROM excluded_accounts FINAL ORDER BY address")
            .fetch_all::<ExcludedAccountRecord>()
            .await?;
        Ok(rows.into_iter().map(ExcludedAccount::from).collect())
    }

    async fn reset_pool(&self, pool_id: &str) -> Result<(), StoreError> {
        for table in ["transfer_events", "holder_balances", "published_snapshots"] {
            self.client
                .query(&format!("ALTER TABLE {} DELETE WHERE pool_id = ?", table))
                .bind(pool_id)
                .execute()
                .await?;
        }
        Ok(())
    }
}
