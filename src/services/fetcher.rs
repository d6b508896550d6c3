use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::db::LedgerStore;
use crate::error::EngineError;
use crate::services::explorer::{TransferSource, OPEN_END_BLOCK};
use crate::types::models::{EventKey, TransferEvent};

/// What one fetch did for a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub start_block: u64,
    pub received: usize,
    pub appended: u64,
    pub self_transfers: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// Pulls the transfers a pool does not have yet and appends them to the
/// event store. Never touches balances.
pub struct IncrementalFetcher {
    source: Arc<dyn TransferSource>,
    store: Arc<dyn LedgerStore>,
}

impl IncrementalFetcher {
    pub fn new(source: Arc<dyn TransferSource>, store: Arc<dyn LedgerStore>) -> Self {
        Self { source, store }
    }

    pub async fn next_start_block(&self, pool_id: &str) -> Result<u64, EngineError> {
        Ok(self
            .store
            .last_block(pool_id)
            .await?
            .map_or(0, |block| block + 1))
    }

    pub async fn fetch_new_events(&self, pool: &PoolConfig) -> Result<FetchOutcome, EngineError> {
        let start_block = self.next_start_block(&pool.id).await?;
        let raw = self
            .source
            .get_transfer_events(pool, start_block, OPEN_END_BLOCK)
            .await?;

        let mut outcome = FetchOutcome {
            start_block,
            received: raw.len(),
            ..Default::default()
        };

        let mut events = Vec::with_capacity(raw.len());
        for transfer in &raw {
            match transfer.to_event(&pool.id) {
                Ok(event) => events.push(event),
                Err(e) => {
                    outcome.malformed += 1;
                    tracing::warn!(
                        "pool {}: skipping transfer at block {}: {}",
                        pool.id,
                        transfer.block_number,
                        e
                    );
                }
            }
        }

        // stable: explorer order is kept inside a block
        events.sort_by_key(|e| e.block_number);

        let before = events.len();
        events.retain(|e| !e.is_self_transfer());
        outcome.self_transfers = before - events.len();

        let before = events.len();
        let events = self.drop_known(&pool.id, start_block, events).await?;
        outcome.duplicates = before - events.len();

        if !events.is_empty() {
            outcome.appended = self.store.append_events(&pool.id, events).await?;
        }

        tracing::info!(
            "pool {}: fetched {} transfers from block {}, appended {} ({} self, {} duplicate, {} malformed)",
            pool.id,
            outcome.received,
            start_block,
            outcome.appended,
            outcome.self_transfers,
            outcome.duplicates,
            outcome.malformed
        );

        Ok(outcome)
    }

    /// Nothing at or past `start_block` can be stored yet, so only the part
    /// of the batch below the cursor is checked against the store. Stored
    /// keys are counted: a transaction may move the same amount between the
    /// same two addresses more than once, and each stored copy only cancels
    /// one re-delivered copy.
    async fn drop_known(
        &self,
        pool_id: &str,
        start_block: u64,
        events: Vec<TransferEvent>,
    ) -> Result<Vec<TransferEvent>, EngineError> {
        let lowest = match events.iter().map(|e| e.block_number).min() {
            Some(lowest) if lowest < start_block => lowest,
            _ => return Ok(events),
        };

        let mut stored: HashMap<EventKey, usize> = HashMap::new();
        for key in self
            .store
            .event_keys_between(pool_id, lowest, start_block - 1)
            .await?
        {
            *stored.entry(key).or_default() += 1;
        }

        Ok(events
            .into_iter()
            .filter(|event| {
                if event.block_number >= start_block {
                    return true;
                }
                match stored.get_mut(&event.identity()) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        false
                    }
                    _ => true,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolKind;
    use crate::db::MemoryStore;
    use crate::error::SourceError;
    use crate::services::explorer::RawTransfer;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned pages and records the start block of every request.
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<Vec<Result<Vec<RawTransfer>, SourceError>>>,
        requested: Mutex<Vec<u64>>,
    }

    impl ScriptedSource {
        fn push(&self, page: Result<Vec<RawTransfer>, SourceError>) {
            self.pages.lock().unwrap().push(page);
        }
    }

    #[async_trait]
    impl TransferSource for ScriptedSource {
        async fn get_transfer_events(
            &self,
            _pool: &PoolConfig,
            start_block: u64,
            _end_block: u64,
        ) -> Result<Vec<RawTransfer>, SourceError> {
            self.requested.lock().unwrap().push(start_block);
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                pages.remove(0)
            }
        }
    }

    fn raw(block: u64, hash: &str, from: &str, to: &str, value: &str) -> RawTransfer {
        RawTransfer {
            block_number: block.to_string(),
            time_stamp: (1_607_731_200 + block).to_string(),
            hash: hash.to_string(),
            log_index: None,
            from: from.to_string(),
            to: to.to_string(),
            value: value.to_string(),
            contract_address: "0xtoken".to_string(),
        }
    }

    fn pool() -> PoolConfig {
        PoolConfig {
            id: "primary".to_string(),
            kind: PoolKind::Primary,
            contract: "0xtoken".to_string(),
            account: None,
        }
    }

    fn fetcher() -> (Arc<ScriptedSource>, Arc<MemoryStore>, IncrementalFetcher) {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new());
        let fetcher = IncrementalFetcher::new(source.clone(), store.clone());
        (source, store, fetcher)
    }

    #[tokio::test]
    async fn empty_store_starts_at_zero() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![raw(5, "0x1", "0xa", "0xb", "10")]));

        let outcome = fetcher.fetch_new_events(&pool()).await.unwrap();
        assert_eq!(outcome.start_block, 0);
        assert_eq!(outcome.appended, 1);
        assert_eq!(store.last_block("primary").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn cursor_resumes_after_last_block_and_accepts_late_events() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![raw(100, "0x1", "0xa", "0xb", "10")]));
        fetcher.fetch_new_events(&pool()).await.unwrap();

        // explorer hands back an older, previously unseen event plus a
        // re-delivery of the stored one
        source.push(Ok(vec![
            raw(95, "0x2", "0xb", "0xc", "3"),
            raw(100, "0x1", "0xa", "0xb", "10"),
            raw(102, "0x3", "0xc", "0xd", "1"),
        ]));
        let outcome = fetcher.fetch_new_events(&pool()).await.unwrap();

        assert_eq!(outcome.start_block, 101);
        assert_eq!(outcome.appended, 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.last_block("primary").await.unwrap(), Some(102));
        assert_eq!(fetcher.next_start_block("primary").await.unwrap(), 103);
        assert_eq!(*source.requested.lock().unwrap(), vec![0, 101]);
    }

    #[tokio::test]
    async fn drops_self_transfers_and_malformed_rows() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![
            raw(1, "0x1", "0xa", "0xa", "10"),
            raw(2, "0x2", "0xa", "0xb", "10"),
            raw(3, "0x3", "0xa", "0xb", "not-a-number"),
        ]));

        let outcome = fetcher.fetch_new_events(&pool()).await.unwrap();
        assert_eq!(outcome.received, 3);
        assert_eq!(outcome.self_transfers, 1);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.appended, 1);
        assert_eq!(store.event_count("primary").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn identical_transfers_in_one_transaction_are_all_kept() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![
            raw(7, "0xabc", "0xa", "0xb", "10"),
            raw(7, "0xabc", "0xa", "0xb", "10"),
        ]));

        let outcome = fetcher.fetch_new_events(&pool()).await.unwrap();
        assert_eq!(outcome.received, 2);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.appended, 2);

        let history = store.load_history("primary").await.unwrap();
        let ledger = crate::services::ledger::replay(&history);
        assert_eq!(ledger.balance("0xb"), Some(&num_bigint::BigInt::from(20)));
    }

    #[tokio::test]
    async fn late_redelivery_cancels_only_as_many_copies_as_are_stored() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![
            raw(5, "0xabc", "0xa", "0xb", "10"),
            raw(9, "0x9", "0xb", "0xc", "1"),
        ]));
        fetcher.fetch_new_events(&pool()).await.unwrap();

        // one copy is stored; the second identical log entry shows up late
        source.push(Ok(vec![
            raw(5, "0xabc", "0xa", "0xb", "10"),
            raw(5, "0xabc", "0xa", "0xb", "10"),
        ]));
        let outcome = fetcher.fetch_new_events(&pool()).await.unwrap();
        assert_eq!(outcome.start_block, 10);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.appended, 1);
        assert_eq!(store.event_count("primary").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn orders_by_block_keeping_explorer_order_within_a_block() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![
            raw(9, "0x9", "0xa", "0xb", "1"),
            raw(4, "0x4b", "0xb", "0xc", "1"),
            raw(4, "0x4a", "0xa", "0xb", "1"),
        ]));
        fetcher.fetch_new_events(&pool()).await.unwrap();

        let hashes: Vec<_> = store
            .load_history("primary")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.tx_hash)
            .collect();
        assert_eq!(hashes, vec!["0x4b", "0x4a", "0x9"]);
    }

    #[tokio::test]
    async fn source_failure_leaves_cursor_alone() {
        let (source, store, fetcher) = fetcher();
        source.push(Ok(vec![raw(7, "0x1", "0xa", "0xb", "1")]));
        fetcher.fetch_new_events(&pool()).await.unwrap();

        source.push(Err(SourceError::RateLimited("Max rate limit reached".to_string())));
        let err = fetcher.fetch_new_events(&pool()).await.unwrap_err();
        assert!(matches!(err, EngineError::Source(SourceError::RateLimited(_))));
        assert!(!err.is_fatal());

        source.push(Ok(Vec::new()));
        fetcher.fetch_new_events(&pool()).await.unwrap();
        assert_eq!(*source.requested.lock().unwrap(), vec![0, 8, 8]);
        assert_eq!(store.event_count("primary").await.unwrap(), 1);
    }
}
