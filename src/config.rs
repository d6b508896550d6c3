use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const PRIMARY_POOL_ID: &str = "primary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Primary,
    Liquidity,
}

/// A tracked asset whose transfers are ledgered independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub id: String,
    pub kind: PoolKind,
    /// Token contract whose transfers make up this pool's ledger.
    pub contract: String,
    /// Restricts the explorer query to transfers touching this account.
    pub account: Option<String>,
}

/// Block explorer access.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub url: String,
    pub api_key: String,
    /// Fixed pause before every explorer call.
    pub call_delay: Duration,
    pub requests_per_second: u32,
    pub page_size: u32,
    pub max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Everything the ledger engine needs to know about the token. Built once at
/// startup and never mutated.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub token_contract: String,
    pub token_symbol: String,
    pub decimals: u32,
    pub pools: Vec<PoolConfig>,
    pub team_address: String,
    pub treasury_address: String,
    pub mint_addresses: Vec<String>,
    pub extra_exclusions: Vec<String>,
    /// Withhold a pool's publication when any non-excluded balance is negative.
    pub strict_consistency: bool,
}

impl LedgerConfig {
    pub fn pool(&self, id: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.id == id)
    }

    pub fn primary_pool(&self) -> &PoolConfig {
        // from_env always puts the primary pool first
        &self.pools[0]
    }

    pub fn liquidity_pools(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.iter().filter(|p| p.kind == PoolKind::Liquidity)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cycle_interval: Duration,
    pub max_concurrent_pools: usize,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub requests_per_second: u64,
    pub burst: u32,
    pub staleness_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub url: String,
    pub coin_id: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    /// Link prefix for holder addresses in `/top` replies.
    pub explorer_token_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub explorer: ExplorerConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub prices: Option<PriceConfig>,
    pub telegram: Option<TelegramConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_map(&vars)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let explorer = ExplorerConfig {
            url: get("ETHERSCAN_URL").unwrap_or_else(|| "https://api.etherscan.io/api".to_string()),
            api_key: required("ETHERSCAN_API_KEY")?,
            call_delay: Duration::from_millis(parse_or(vars, "EXPLORER_CALL_DELAY_MS", 400)?),
            requests_per_second: parse_or(vars, "EXPLORER_REQUESTS_PER_SECOND", 5)?,
            page_size: parse_or(vars, "EXPLORER_PAGE_SIZE", 10_000)?,
            max_pages: parse_or(vars, "EXPLORER_MAX_PAGES", 10)?,
        };
        if explorer.requests_per_second == 0 {
            return Err(ConfigError::Invalid {
                name: "EXPLORER_REQUESTS_PER_SECOND",
                reason: "must be at least 1".to_string(),
            });
        }

        let database = DatabaseConfig {
            url: get("CLICKHOUSE_URL").unwrap_or_else(|| "http://localhost:8123".to_string()),
            database: get("CLICKHOUSE_DATABASE").unwrap_or_else(|| "default".to_string()),
            user: get("CLICKHOUSE_USER"),
            password: get("CLICKHOUSE_PASSWORD"),
        };

        let token_contract = normalize_address("TOKEN_CONTRACT", &required("TOKEN_CONTRACT")?)?;
        let mut pools = vec![PoolConfig {
            id: PRIMARY_POOL_ID.to_string(),
            kind: PoolKind::Primary,
            contract: token_contract.clone(),
            account: None,
        }];
        if let Some(raw) = get("LIQUIDITY_POOLS") {
            for pool in parse_pools(&raw)? {
                if pools.iter().any(|p| p.id == pool.id) {
                    return Err(ConfigError::Invalid {
                        name: "LIQUIDITY_POOLS",
                        reason: format!("duplicate pool id {}", pool.id),
                    });
                }
                pools.push(pool);
            }
        }

        let mint_addresses = match get("MINT_ADDRESSES") {
            Some(raw) => parse_address_list("MINT_ADDRESSES", &raw)?,
            None => vec![ZERO_ADDRESS.to_string()],
        };
        let extra_exclusions = match get("EXCLUDED_ADDRESSES") {
            Some(raw) => parse_address_list("EXCLUDED_ADDRESSES", &raw)?,
            None => Vec::new(),
        };

        let ledger = LedgerConfig {
            token_contract,
            token_symbol: get("TOKEN_SYMBOL").unwrap_or_else(|| "TOKEN".to_string()),
            decimals: parse_or(vars, "TOKEN_DECIMALS", 18)?,
            pools,
            team_address: normalize_address("TEAM_ADDRESS", &required("TEAM_ADDRESS")?)?,
            treasury_address: normalize_address("TREASURY_ADDRESS", &required("TREASURY_ADDRESS")?)?,
            mint_addresses,
            extra_exclusions,
            strict_consistency: parse_or(vars, "STRICT_CONSISTENCY", true)?,
        };

        let scheduler = SchedulerConfig {
            cycle_interval: Duration::from_secs(parse_or(vars, "CYCLE_INTERVAL_SECS", 900)?),
            max_concurrent_pools: parse_or::<usize>(vars, "MAX_CONCURRENT_POOLS", 2)?.max(1),
        };

        let api = ApiConfig {
            bind_addr: parse_or(vars, "API_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            requests_per_second: parse_or(vars, "API_REQUESTS_PER_SECOND", 2)?,
            burst: parse_or(vars, "API_BURST", 20)?,
            staleness_minutes: parse_or(vars, "STALENESS_MINUTES", 30)?,
        };

        let prices = get("COINGECKO_COIN_ID").map(|coin_id| PriceConfig {
            url: get("COINGECKO_URL").unwrap_or_else(|| "https://api.coingecko.com/api/v3".to_string()),
            coin_id,
        });

        let telegram = get("TELEGRAM_BOT_TOKEN").map(|bot_token| TelegramConfig {
            api_url: get("TELEGRAM_API_URL").unwrap_or_else(|| "https://api.telegram.org".to_string()),
            bot_token,
            explorer_token_url: format!("https://etherscan.io/token/{}?a=", ledger.token_contract),
        });

        Ok(Self {
            explorer,
            database,
            ledger,
            scheduler,
            api,
            prices,
            telegram,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name: key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Lowercases and validates a 20-byte hex address.
pub fn normalize_address(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let address = raw.trim().to_ascii_lowercase();
    let valid = address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(address)
    } else {
        Err(ConfigError::Invalid {
            name,
            reason: format!("{} is not a 0x-prefixed 20 byte address", raw.trim()),
        })
    }
}

fn parse_address_list(name: &'static str, raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| normalize_address(name, s))
        .collect()
}

/// `id:contract[:account]` entries separated by commas.
fn parse_pools(raw: &str) -> Result<Vec<PoolConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (id, contract, account) = match parts.as_slice() {
                [id, contract] => (*id, *contract, None),
                [id, contract, account] => (*id, *contract, Some(*account)),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "LIQUIDITY_POOLS",
                        reason: format!("expected id:contract[:account], got {}", entry),
                    })
                }
            };
            if id.is_empty() || id == PRIMARY_POOL_ID {
                return Err(ConfigError::Invalid {
                    name: "LIQUIDITY_POOLS",
                    reason: format!("invalid pool id '{}'", id),
                });
            }
            Ok(PoolConfig {
                id: id.to_string(),
                kind: PoolKind::Liquidity,
                contract: normalize_address("LIQUIDITY_POOLS", contract)?,
                account: account
                    .map(|a| normalize_address("LIQUIDITY_POOLS", a))
                    .transpose()?,
            })
        })
        .collect()
}
