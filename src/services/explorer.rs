use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use nonzero_ext::nonzero;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ExplorerConfig, PoolConfig};
use crate::error::SourceError;
use crate::types::models::TransferEvent;

pub type ExplorerRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upper block bound the explorer accepts as "latest".
pub const OPEN_END_BLOCK: u64 = 99_999_999;

/// A transfer exactly as the explorer reported it. Numeric fields stay
/// strings until [`RawTransfer::to_event`] so one bad row cannot sink a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransfer {
    pub block_number: String,
    pub time_stamp: String,
    pub hash: String,
    #[serde(default)]
    pub log_index: Option<String>,
    pub from: String,
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub contract_address: String,
}

impl RawTransfer {
    fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.trim().parse().ok()
    }

    pub fn to_event(&self, pool_id: &str) -> Result<TransferEvent, SourceError> {
        let parse_err = |field| SourceError::Parse {
            field,
            payload: self.payload(),
        };

        let block_number = self.block().ok_or_else(|| parse_err("blockNumber"))?;
        let timestamp = self
            .time_stamp
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| parse_err("timeStamp"))?;
        let raw_value = self
            .value
            .trim()
            .parse::<BigInt>()
            .ok()
            .filter(|v| v.sign() != num_bigint::Sign::Minus)
            .ok_or_else(|| parse_err("value"))?;
        let log_index = match self.log_index.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| parse_err("logIndex"))?),
        };

        Ok(TransferEvent {
            pool_id: pool_id.to_string(),
            block_number,
            ingest_seq: 0,
            tx_hash: self.hash.trim().to_ascii_lowercase(),
            log_index,
            timestamp,
            from_address: self.from.trim().to_ascii_lowercase(),
            to_address: self.to.trim().to_ascii_lowercase(),
            raw_value,
        })
    }
}

/// Transfer-log side of the explorer.
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Transfers of `pool` in `[start_block, end_block]`, ascending by block.
    async fn get_transfer_events(
        &self,
        pool: &PoolConfig,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawTransfer>, SourceError>;
}

/// Point-in-time balance reads.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn get_balance(&self, contract: &str, address: &str) -> Result<BigInt, SourceError>;
    async fn get_total_supply(&self, contract: &str) -> Result<BigInt, SourceError>;
}

#[derive(Debug, Deserialize)]
struct EsResponse {
    status: String,
    message: String,
    result: Value,
}

/// Etherscan-compatible explorer client.
///
/// Every request waits the configured fixed delay and then for the shared
/// quota, so several pools fetched concurrently still respect the
/// third-party limit together.
#[derive(Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    config: ExplorerConfig,
    rate_limiter: Arc<ExplorerRateLimiter>,
}

impl EtherscanClient {
    pub fn new(config: ExplorerConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(1u32));
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        Ok(Self {
            http,
            config,
            rate_limiter,
        })
    }

    async fn pace(&self) {
        if !self.config.call_delay.is_zero() {
            tokio::time::sleep(self.config.call_delay).await;
        }
        self.rate_limiter.until_ready().await;
    }

    async fn call(&self, params: &[(&str, String)]) -> Result<Value, SourceError> {
        self.pace().await;

        let response = self
            .http
            .get(&self.config.url)
            .query(params)
            .query(&[("apikey", self.config.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(status.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Api(format!("HTTP {}", status)));
        }

        let body: EsResponse = response.json().await?;
        if body.status == "1" {
            return Ok(body.result);
        }

        let detail = match &body.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if body.message.starts_with("No transactions found") {
            return Ok(Value::Array(Vec::new()));
        }
        if detail.to_ascii_lowercase().contains("rate limit") {
            return Err(SourceError::RateLimited(detail));
        }
        Err(SourceError::Api(format!("{}: {}", body.message, detail)))
    }

    async fn fetch_page(
        &self,
        pool: &PoolConfig,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawTransfer>, SourceError> {
        let mut params = vec![
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("contractaddress", pool.contract.clone()),
            ("startblock", start_block.to_string()),
            ("endblock", end_block.to_string()),
            ("page", "1".to_string()),
            ("offset", self.config.page_size.to_string()),
            ("sort", "asc".to_string()),
        ];
        if let Some(account) = &pool.account {
            params.push(("address", account.clone()));
        }

        let result = self.call(&params).await?;
        serde_json::from_value(result).map_err(|e| SourceError::Parse {
            field: "result",
            payload: e.to_string(),
        })
    }

    async fn fetch_scalar(&self, params: &[(&str, String)]) -> Result<BigInt, SourceError> {
        let result = self.call(params).await?;
        let raw = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        raw.trim().parse::<BigInt>().map_err(|_| SourceError::Parse {
            field: "result",
            payload: raw,
        })
    }
}

/// Rows at the end of `taken` that belong to `block`.
fn block_tail(taken: &[RawTransfer], block: u64) -> &[RawTransfer] {
    let kept = taken
        .iter()
        .rposition(|t| t.block() != Some(block))
        .map_or(0, |i| i + 1);
    &taken[kept..]
}

/// How many leading rows of `page` repeat `tail` position by position.
fn overlap_len(tail: &[RawTransfer], page: &[RawTransfer]) -> usize {
    tail.iter().zip(page).take_while(|(a, b)| a == b).count()
}

#[async_trait]
impl TransferSource for EtherscanClient {
    /// A full page means there may be more, so the next page starts again at
    /// the last block seen and its leading rows that repeat the previous
    /// page are skipped. If paging stops on a full page, the last block may
    /// be incomplete: it is left out so the next cycle's cursor lands on it.
    async fn get_transfer_events(
        &self,
        pool: &PoolConfig,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawTransfer>, SourceError> {
        let page_size = self.config.page_size as usize;
        let mut from_block = start_block;
        let mut transfers: Vec<RawTransfer> = Vec::new();
        let mut complete = false;

        for page in 1..=self.config.max_pages {
            let batch = self.fetch_page(pool, from_block, end_block).await?;
            let count = batch.len();
            let last_block = batch.iter().rev().find_map(RawTransfer::block);
            let overlap = if page == 1 {
                0
            } else {
                overlap_len(block_tail(&transfers, from_block), &batch)
            };
            transfers.extend(batch.into_iter().skip(overlap));

            tracing::debug!(
                "pool {}: page {} returned {} transfers from block {} ({} repeated)",
                pool.id,
                page,
                count,
                from_block,
                overlap
            );

            if count < page_size {
                complete = true;
                break;
            }
            match last_block {
                Some(block) if block > from_block => from_block = block,
                _ => {
                    tracing::warn!(
                        "pool {}: block {} alone fills a page of {}, stopping pagination",
                        pool.id,
                        from_block,
                        page_size
                    );
                    break;
                }
            }
        }

        if !complete {
            drop_partial_block(&pool.id, &mut transfers, page_size)?;
        }
        Ok(transfers)
    }
}

fn drop_partial_block(
    pool_id: &str,
    transfers: &mut Vec<RawTransfer>,
    page_size: usize,
) -> Result<(), SourceError> {
    let Some(last) = transfers.iter().rev().find_map(RawTransfer::block) else {
        return Ok(());
    };
    transfers.retain(|t| t.block() != Some(last));
    if !transfers.iter().any(|t| t.block().is_some()) {
        return Err(SourceError::BlockOverflow {
            block: last,
            page_size,
        });
    }
    tracing::info!(
        "pool {}: page limit reached inside block {}, resuming there next cycle",
        pool_id,
        last
    );
    Ok(())
}

#[async_trait]
impl BalanceSource for EtherscanClient {
    async fn get_balance(&self, contract: &str, address: &str) -> Result<BigInt, SourceError> {
        self.fetch_scalar(&[
            ("module", "account".to_string()),
            ("action", "tokenbalance".to_string()),
            ("contractaddress", contract.to_string()),
            ("address", address.to_string()),
            ("tag", "latest".to_string()),
        ])
        .await
    }

    async fn get_total_supply(&self, contract: &str) -> Result<BigInt, SourceError> {
        self.fetch_scalar(&[
            ("module", "stats".to_string()),
            ("action", "tokensupply".to_string()),
            ("contractaddress", contract.to_string()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolKind;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, page_size: u32) -> EtherscanClient {
        paged_client(server, page_size, 5)
    }

    fn paged_client(server: &MockServer, page_size: u32, max_pages: u32) -> EtherscanClient {
        EtherscanClient::new(ExplorerConfig {
            url: format!("{}/api", server.uri()),
            api_key: "test".to_string(),
            call_delay: Duration::ZERO,
            requests_per_second: 100,
            page_size,
            max_pages,
        })
        .unwrap()
    }

    async fn respond(server: &MockServer, start_block: u64, rows: Vec<Value>) {
        Mock::given(method("GET"))
            .and(query_param("startblock", start_block.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1",
                "message": "OK",
                "result": rows
            })))
            .mount(server)
            .await;
    }

    fn pool() -> PoolConfig {
        PoolConfig {
            id: "primary".to_string(),
            kind: PoolKind::Primary,
            contract: "0xdcb01cc464238396e213a6fdd933e36796eaff9f".to_string(),
            account: None,
        }
    }

    fn transfer(block: u64, from: &str, to: &str, value: &str) -> Value {
        tx(block, &format!("0xhash{}", block), from, to, value)
    }

    fn tx(block: u64, hash: &str, from: &str, to: &str, value: &str) -> Value {
        serde_json::json!({
            "blockNumber": block.to_string(),
            "timeStamp": "1607731200",
            "hash": hash,
            "from": from,
            "to": to,
            "value": value,
            "contractAddress": "0xdcb01cc464238396e213a6fdd933e36796eaff9f"
        })
    }

    #[test]
    fn raw_transfer_parses_and_normalizes() {
        let raw: RawTransfer =
            serde_json::from_value(transfer(7, "0xAA", "0xBb", "1000000000000000000000")).unwrap();
        let event = raw.to_event("primary").unwrap();
        assert_eq!(event.block_number, 7);
        assert_eq!(event.from_address, "0xaa");
        assert_eq!(event.to_address, "0xbb");
        assert_eq!(event.raw_value.to_string(), "1000000000000000000000");
        assert_eq!(event.timestamp.timestamp(), 1_607_731_200);
        assert_eq!(event.log_index, None);
    }

    #[test]
    fn raw_transfer_rejects_bad_numbers() {
        let raw: RawTransfer = serde_json::from_value(transfer(7, "0xaa", "0xbb", "12e5")).unwrap();
        assert!(matches!(
            raw.to_event("primary"),
            Err(SourceError::Parse { field: "value", .. })
        ));

        let raw: RawTransfer = serde_json::from_value(transfer(7, "0xaa", "0xbb", "-5")).unwrap();
        assert!(raw.to_event("primary").is_err());
    }

    #[tokio::test]
    async fn fetches_transfers_from_start_block() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("action", "tokentx"))
            .and(query_param("startblock", "101"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1",
                "message": "OK",
                "result": [transfer(101, "0xa", "0xb", "5"), transfer(102, "0xb", "0xc", "2")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transfers = client(&server, 100)
            .get_transfer_events(&pool(), 101, OPEN_END_BLOCK)
            .await
            .unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[1].block_number, "102");
    }

    fn hashes(transfers: &[RawTransfer]) -> Vec<&str> {
        transfers.iter().map(|t| t.hash.as_str()).collect()
    }

    #[tokio::test]
    async fn full_pages_continue_from_last_block() {
        let server = MockServer::start().await;
        respond(
            &server,
            0,
            vec![transfer(1, "0xa", "0xb", "5"), transfer(4, "0xb", "0xc", "2")],
        )
        .await;
        respond(
            &server,
            4,
            vec![transfer(4, "0xb", "0xc", "2"), transfer(6, "0xc", "0xd", "1")],
        )
        .await;
        respond(&server, 6, vec![transfer(6, "0xc", "0xd", "1")]).await;

        let transfers = client(&server, 2)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap();
        assert_eq!(hashes(&transfers), vec!["0xhash1", "0xhash4", "0xhash6"]);
    }

    #[tokio::test]
    async fn identical_rows_survive_a_page_boundary() {
        let server = MockServer::start().await;
        respond(
            &server,
            0,
            vec![
                tx(1, "0xa1", "0xa", "0xb", "5"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
            ],
        )
        .await;
        respond(
            &server,
            4,
            vec![
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
            ],
        )
        .await;

        // block 4 fills the second page on its own, so it is held back
        let transfers = paged_client(&server, 3, 5)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap();
        assert_eq!(hashes(&transfers), vec!["0xa1"]);

        let server = MockServer::start().await;
        respond(
            &server,
            0,
            vec![
                tx(1, "0xa1", "0xa", "0xb", "5"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
            ],
        )
        .await;
        respond(
            &server,
            4,
            vec![
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(4, "0xdup", "0xb", "0xc", "2"),
                tx(5, "0xe5", "0xc", "0xd", "1"),
            ],
        )
        .await;
        respond(&server, 5, vec![tx(5, "0xe5", "0xc", "0xd", "1")]).await;

        let transfers = paged_client(&server, 3, 5)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap();
        assert_eq!(hashes(&transfers), vec!["0xa1", "0xdup", "0xdup", "0xe5"]);
    }

    #[tokio::test]
    async fn page_limit_holds_back_the_partial_last_block() {
        use crate::db::{LedgerStore, MemoryStore};
        use crate::services::fetcher::IncrementalFetcher;

        let server = MockServer::start().await;
        respond(
            &server,
            0,
            vec![
                tx(1, "0x1", "0xa", "0xb", "5"),
                tx(2, "0x2", "0xb", "0xc", "1"),
                tx(4, "0x4a", "0xb", "0xc", "1"),
            ],
        )
        .await;
        respond(
            &server,
            3,
            vec![tx(4, "0x4a", "0xb", "0xc", "1"), tx(4, "0x4b", "0xc", "0xd", "1")],
        )
        .await;
        respond(&server, 5, Vec::new()).await;

        let store = Arc::new(MemoryStore::new());
        let fetcher = IncrementalFetcher::new(Arc::new(paged_client(&server, 3, 1)), store.clone());
        for _ in 0..3 {
            fetcher.fetch_new_events(&pool()).await.unwrap();
        }

        let stored: Vec<_> = store
            .load_history("primary")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.tx_hash)
            .collect();
        assert_eq!(stored, vec!["0x1", "0x2", "0x4a", "0x4b"]);
    }

    #[tokio::test]
    async fn block_filling_the_only_page_is_an_error() {
        let server = MockServer::start().await;
        respond(
            &server,
            0,
            vec![tx(5, "0x5a", "0xa", "0xb", "1"), tx(5, "0x5b", "0xb", "0xc", "1")],
        )
        .await;

        let err = client(&server, 2)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::BlockOverflow { block: 5, page_size: 2 }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn no_transactions_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "0",
                "message": "No transactions found",
                "result": []
            })))
            .mount(&server)
            .await;

        let transfers = client(&server, 100)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap();
        assert!(transfers.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Max rate limit reached"
            })))
            .mount(&server)
            .await;

        let err = client(&server, 100)
            .get_transfer_events(&pool(), 0, OPEN_END_BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::RateLimited(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn reads_balances_and_supply() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "tokensupply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1", "message": "OK", "result": "30000000000000000000000"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("action", "tokenbalance"))
            .and(query_param("address", "0xteam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1", "message": "OK", "result": "1500"
            })))
            .mount(&server)
            .await;

        let client = client(&server, 100);
        let supply = client.get_total_supply("0xtoken").await.unwrap();
        assert_eq!(supply.to_string(), "30000000000000000000000");
        let balance = client.get_balance("0xtoken", "0xteam").await.unwrap();
        assert_eq!(balance, BigInt::from(1500));
    }
}
