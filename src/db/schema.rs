pub const TRANSFER_EVENTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_events (
    pool_id LowCardinality(String),
    block_number UInt64,
    ingest_seq UInt64,
    tx_hash String,
    log_index Nullable(UInt64),
    timestamp DateTime('UTC'),
    from_address String,
    to_address String,
    raw_value String,
    ingested_at DateTime('UTC') DEFAULT now('UTC')
) ENGINE = MergeTree()
ORDER BY (pool_id, block_number, ingest_seq)
"#;

pub const HOLDER_BALANCES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS holder_balances (
    pool_id LowCardinality(String),
    snapshot_id UUID,
    address String,
    balance String,
    first_block_number UInt64,
    first_timestamp DateTime('UTC')
) ENGINE = MergeTree()
ORDER BY (pool_id, snapshot_id, address)
"#;

pub const PUBLISHED_SNAPSHOTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS published_snapshots (
    pool_id LowCardinality(String),
    snapshot_id UUID,
    published_at DateTime64(6, 'UTC'),
    holder_count UInt64
) ENGINE = MergeTree()
ORDER BY (pool_id, published_at)
"#;

pub const TOKEN_STATS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_stats (
    captured_at DateTime('UTC'),
    group_id UUID,
    total_supply String,
    team_balance String,
    treasury_balance String,
    locked_pools Array(String),
    locked_amounts Array(String),
    circulating_supply String,
    transaction_count UInt64
) ENGINE = MergeTree()
ORDER BY captured_at
"#;

pub const TOKEN_PRICES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_prices (
    captured_at DateTime('UTC'),
    group_id UUID,
    source LowCardinality(String),
    price_usd Float64,
    price_usd_change LowCardinality(String),
    price_usd_change_pct Float64,
    price_eth Float64,
    price_eth_change LowCardinality(String),
    price_eth_change_pct Float64,
    price_btc Float64,
    price_btc_change LowCardinality(String),
    price_btc_change_pct Float64,
    market_cap_usd Float64,
    market_cap_usd_change LowCardinality(String),
    market_cap_usd_change_pct Float64,
    volume_usd Float64
) ENGINE = MergeTree()
ORDER BY (captured_at, group_id)
"#;

pub const EXCLUDED_ACCOUNTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS excluded_accounts (
    address String,
    category LowCardinality(String),
    description String,
    updated_at DateTime('UTC') DEFAULT now('UTC'),
    PRIMARY KEY (address)
) ENGINE = ReplacingMergeTree(updated_at)
"#;

pub const ALL_TABLES: &[&str] = &[
    TRANSFER_EVENTS_SQL,
    HOLDER_BALANCES_SQL,
    PUBLISHED_SNAPSHOTS_SQL,
    TOKEN_STATS_SQL,
    TOKEN_PRICES_SQL,
    EXCLUDED_ACCOUNTS_SQL,
];
