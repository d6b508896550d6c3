use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::PriceConfig;
use crate::db::LedgerStore;
use crate::error::{EngineError, SourceError};
use crate::types::models::{Change, PriceRecord};

pub const COINGECKO_SOURCE: &str = "coingecko";

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current market figures, tagged with the stats group they belong to.
    async fn fetch_price(&self, group_id: Uuid) -> Result<PriceRecord, SourceError>;
}

type CurrencyMap = HashMap<String, Option<f64>>;

#[derive(Debug, Deserialize)]
struct CoinResponse {
    market_data: MarketData,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    current_price: CurrencyMap,
    #[serde(default)]
    price_change_24h_in_currency: CurrencyMap,
    #[serde(default)]
    price_change_percentage_24h_in_currency: CurrencyMap,
    #[serde(default)]
    market_cap: CurrencyMap,
    #[serde(default)]
    market_cap_change_24h_in_currency: CurrencyMap,
    #[serde(default)]
    market_cap_change_percentage_24h_in_currency: CurrencyMap,
    #[serde(default)]
    total_volume: CurrencyMap,
}

fn value(map: &CurrencyMap, currency: &str) -> Option<f64> {
    map.get(currency).copied().flatten()
}

fn or_zero(map: &CurrencyMap, currency: &str) -> f64 {
    value(map, currency).unwrap_or(0.0)
}

impl MarketData {
    fn price(&self, currency: &str) -> Result<f64, SourceError> {
        value(&self.current_price, currency).ok_or_else(|| SourceError::Parse {
            field: "current_price",
            payload: format!("missing {}", currency),
        })
    }

    fn into_record(self, group_id: Uuid) -> Result<PriceRecord, SourceError> {
        let usd_change = or_zero(&self.price_change_24h_in_currency, "usd");
        let eth_change = or_zero(&self.price_change_24h_in_currency, "eth");
        let btc_change = or_zero(&self.price_change_24h_in_currency, "btc");
        let mcap_change = or_zero(&self.market_cap_change_24h_in_currency, "usd");

        Ok(PriceRecord {
            captured_at: Utc::now(),
            group_id,
            source: COINGECKO_SOURCE.to_string(),
            price_usd: self.price("usd")?,
            price_usd_change: Change::from_delta(usd_change),
            price_usd_change_pct: or_zero(&self.price_change_percentage_24h_in_currency, "usd"),
            price_eth: self.price("eth")?,
            price_eth_change: Change::from_delta(eth_change),
            price_eth_change_pct: or_zero(&self.price_change_percentage_24h_in_currency, "eth"),
            price_btc: self.price("btc")?,
            price_btc_change: Change::from_delta(btc_change),
            price_btc_change_pct: or_zero(&self.price_change_percentage_24h_in_currency, "btc"),
            market_cap_usd: or_zero(&self.market_cap, "usd").round(),
            market_cap_usd_change: Change::from_delta(mcap_change),
            market_cap_usd_change_pct: or_zero(&self.market_cap_change_percentage_24h_in_currency, "usd"),
            volume_usd: or_zero(&self.total_volume, "usd").round(),
        })
    }
}

pub struct CoinGeckoClient {
    http: reqwest::Client,
    config: PriceConfig,
}

impl CoinGeckoClient {
    pub fn new(config: PriceConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn fetch_price(&self, group_id: Uuid) -> Result<PriceRecord, SourceError> {
        let url = format!("{}/coins/{}", self.config.url.trim_end_matches('/'), self.config.coin_id);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("localization", "false"),
                ("tickers", "false"),
                ("market_data", "true"),
                ("community_data", "false"),
                ("developer_data", "false"),
                ("sparkline", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(status.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Api(format!("HTTP {}", status)));
        }

        let body: CoinResponse = response.json().await?;
        body.market_data.into_record(group_id)
    }
}

/// Appends a price record for the stats group that was just captured.
pub async fn record_price(
    source: &dyn PriceSource,
    store: &dyn LedgerStore,
    group_id: Uuid,
) -> Result<PriceRecord, EngineError> {
    let price = source.fetch_price(group_id).await?;
    store.insert_price(&price).await?;
    tracing::info!("Recorded price ${} for group {}", price.price_usd, group_id);
    Ok(price)
}
