//! Chat bot commands.
//!
//! A command is `/name args`. Each name maps to one handler in the
//! registry; handlers only read through the [`QueryFacade`] and return the
//! HTML reply text.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueryError;
use crate::services::query::{parse_decimal, QueryFacade};
use crate::types::units::format_amount;

const DEFAULT_TOP: usize = 10;
const MAX_TOP_REPLY: usize = 50;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn reply(&self, query: &QueryFacade, args: &str) -> Result<String, QueryError>;
}

/// Splits `/top@SomeBot 5` into `("top", "5")`. Anything not starting with
/// a slash is not a command.
pub fn parse_command(text: &str) -> Option<(String, &str)> {
    let body = text.trim().strip_prefix('/')?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };
    let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}

/// `1234567.5` -> `1,234,567.5`
fn group_thousands(raw: &str) -> String {
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let mut grouped = String::with_capacity(raw.len() + raw.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

fn format_large(value: f64) -> String {
    group_thousands(&format!("{:.0}", value))
}

fn short_address(address: &str) -> &str {
    address.get(..10).unwrap_or(address)
}

struct PriceCommand;

#[async_trait]
impl CommandHandler for PriceCommand {
    async fn reply(&self, query: &QueryFacade, _args: &str) -> Result<String, QueryError> {
        let price = match query.latest_price().await? {
            Some(price) => price,
            None => return Ok("No price data yet.".to_string()),
        };
        Ok(format!(
            "$ <b>{:.4}</b>\n₿ <b>{:.8}</b>\nΞ <b>{:.6}</b>",
            price.price_usd, price.price_btc, price.price_eth
        ))
    }
}

struct SupplyCommand;

#[async_trait]
impl CommandHandler for SupplyCommand {
    async fn reply(&self, query: &QueryFacade, _args: &str) -> Result<String, QueryError> {
        let supply = query.supply().await?;
        let symbol = &query.config().token_symbol;
        Ok(format!(
            "Supply: <b>{}</b> ${}\nCirculation: <b>{}</b> ${}",
            group_thousands(&format_amount(&supply.total_supply, 2)),
            symbol,
            group_thousands(&format_amount(&supply.circulating_supply, 2)),
            symbol
        ))
    }
}

struct MarketCapCommand;

#[async_trait]
impl CommandHandler for MarketCapCommand {
    async fn reply(&self, query: &QueryFacade, _args: &str) -> Result<String, QueryError> {
        let price = match query.latest_price().await? {
            Some(price) => price,
            None => return Ok("No price data yet.".to_string()),
        };
        Ok(format!(
            "Market Cap: $ <b>{}</b>\nVolume (24h): $ <b>{}</b>",
            format_large(price.market_cap_usd),
            format_large(price.volume_usd)
        ))
    }
}

struct TopCommand {
    link_prefix: Option<String>,
}

#[async_trait]
impl CommandHandler for TopCommand {
    async fn reply(&self, query: &QueryFacade, args: &str) -> Result<String, QueryError> {
        let count = args
            .parse::<usize>()
            .unwrap_or(DEFAULT_TOP)
            .clamp(1, MAX_TOP_REPLY);
        let pool = query.config().primary_pool().id.clone();
        let holders = query.top_holders(&pool, count).await?;
        if holders.is_empty() {
            return Ok("No holders published yet.".to_string());
        }

        let mut reply = String::new();
        for holder in &holders {
            let label = match &self.link_prefix {
                Some(prefix) => format!(
                    "<a href='{}{}'>{}</a>",
                    prefix,
                    holder.address,
                    short_address(&holder.address)
                ),
                None => short_address(&holder.address).to_string(),
            };
            reply.push_str(&format!(
                "<i>{}</i>. {}: <b>{}</b>\n",
                holder.rank,
                label,
                group_thousands(&format_amount(&holder.amount, 2))
            ));
        }
        Ok(reply)
    }
}

struct ShareCommand;

#[async_trait]
impl CommandHandler for ShareCommand {
    async fn reply(&self, query: &QueryFacade, args: &str) -> Result<String, QueryError> {
        if args.is_empty() {
            return Ok("Usage: /share &lt;amount&gt; or /share &lt;percent&gt;%".to_string());
        }
        let symbol = &query.config().token_symbol;
        let share = match args.strip_suffix('%') {
            Some(pct) => query.share_of_percent(&parse_decimal(pct)?).await?,
            None => query.share_of_amount(&parse_decimal(args)?).await?,
        };
        Ok(format!(
            "<b>{}</b> ${} is <b>{}%</b> of the circulating supply",
            group_thousands(&format_amount(&share.amount, 2)),
            symbol,
            format_amount(&share.percent, 4)
        ))
    }
}

struct HoldersCommand;

#[async_trait]
impl CommandHandler for HoldersCommand {
    async fn reply(&self, query: &QueryFacade, _args: &str) -> Result<String, QueryError> {
        let mut reply = String::new();
        for pool in &query.config().pools {
            let count = query.holder_count(&pool.id).await?;
            reply.push_str(&format!("{}: <b>{}</b> holders\n", pool.id, group_thousands(&count.to_string())));
        }
        Ok(reply)
    }
}

/// Command name -> handler.
pub struct CommandRegistry {
    query: QueryFacade,
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new(query: QueryFacade) -> Self {
        Self {
            query,
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with every built-in command.
    pub fn with_defaults(query: QueryFacade, link_prefix: Option<String>) -> Self {
        let mut registry = Self::new(query);
        registry.register("price", Arc::new(PriceCommand));
        registry.register("supply", Arc::new(SupplyCommand));
        registry.register("mcap", Arc::new(MarketCapCommand));
        registry.register("top", Arc::new(TopCommand { link_prefix }));
        registry.register("share", Arc::new(ShareCommand));
        registry.register("holders", Arc::new(HoldersCommand));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.to_ascii_lowercase(), handler);
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// `None` for plain text and unknown commands. Handler errors become a
    /// short reply instead of silence.
    pub async fn dispatch(&self, text: &str) -> Option<String> {
        let (name, args) = parse_command(text)?;
        let handler = self.handlers.get(&name)?;

        tracing::info!("Command: {}, Args: {}", name, args);

        match handler.reply(&self.query, args).await {
            Ok(reply) => Some(reply),
            Err(QueryError::Storage(e)) => {
                tracing::error!("Command {} failed: {}", name, e);
                Some("Data is temporarily unavailable.".to_string())
            }
            Err(e) => Some(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, PoolConfig, PoolKind};
    use crate::db::{LedgerStore, MemoryStore};
    use crate::types::models::{HolderBalance, StatsSnapshot};
    use chrono::{DateTime, Utc};
    use num_bigint::BigInt;
    use uuid::Uuid;

    fn registry(store: Arc<MemoryStore>) -> CommandRegistry {
        let config = Arc::new(LedgerConfig {
            token_contract: "0xtoken".to_string(),
            token_symbol: "YLD".to_string(),
            decimals: 0,
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
        });
        CommandRegistry::with_defaults(
            QueryFacade::new(store, config, 30),
            Some("https://etherscan.io/token/0xtoken?a=".to_string()),
        )
    }

    async fn seed(store: &MemoryStore) {
        store
            .insert_stats(&StatsSnapshot {
                captured_at: Utc::now(),
                group_id: Uuid::new_v4(),
                total_supply: BigInt::from(30_000),
                team_balance: BigInt::from(0),
                treasury_balance: BigInt::from(0),
                locked: Vec::new(),
                circulating_supply: BigInt::from(1_000),
                transaction_count: 0,
            })
            .await
            .unwrap();
        let at = DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap();
        store
            .publish_snapshot(
                "primary",
                vec![
                    HolderBalance {
                        pool_id: "primary".to_string(),
                        address: "0x1111111111222222222233333333334444444444".to_string(),
                        balance: BigInt::from(600),
                        first_block_number: 1,
                        first_timestamp: at,
                    },
                    HolderBalance {
                        pool_id: "primary".to_string(),
                        address: "0x5555555555666666666677777777778888888888".to_string(),
                        balance: BigInt::from(400),
                        first_block_number: 2,
                        first_timestamp: at,
                    },
                ],
            )
            .await
            .unwrap();
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("/top 5"), Some(("top".to_string(), "5")));
        assert_eq!(parse_command("/Price@YldBot"), Some(("price".to_string(), "")));
        assert_eq!(parse_command("/share   25% "), Some(("share".to_string(), "25%")));
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands("1234567.50"), "1,234,567.50");
        assert_eq!(group_thousands("999"), "999");
        assert_eq!(group_thousands("-1000"), "-1,000");
        assert_eq!(format_large(1234567.6), "1,234,568");
    }

    #[tokio::test]
    async fn dispatches_known_commands_only() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let registry = registry(store);

        assert_eq!(registry.dispatch("just chatting").await, None);
        assert_eq!(registry.dispatch("/unknown").await, None);

        let supply = registry.dispatch("/supply").await.unwrap();
        assert!(supply.contains("Supply: <b>30,000.00</b> $YLD"));
        assert!(supply.contains("Circulation: <b>1,000.00</b> $YLD"));

        let top = registry.dispatch("/top 1").await.unwrap();
        assert_eq!(top.lines().count(), 1);
        assert!(top.contains("<a href='https://etherscan.io/token/0xtoken?a=0x1111111111222222222233333333334444444444'>0x11111111</a>"));
    }

    #[tokio::test]
    async fn share_accepts_amount_or_percent() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let registry = registry(store);

        let by_amount = registry.dispatch("/share 250").await.unwrap();
        assert!(by_amount.contains("<b>25.0000%</b>"), "{}", by_amount);

        let by_percent = registry.dispatch("/share 10%").await.unwrap();
        assert!(by_percent.starts_with("<b>100.00</b> $YLD"), "{}", by_percent);

        let too_much = registry.dispatch("/share 1001").await.unwrap();
        assert!(too_much.contains("must be greater than 0"), "{}", too_much);
    }

    #[tokio::test]
    async fn missing_price_gets_a_polite_reply() {
        let registry = registry(Arc::new(MemoryStore::new()));
        assert_eq!(registry.dispatch("/price").await.as_deref(), Some("No price data yet."));
        assert!(registry.commands().any(|c| c == "holders"));
    }
}
