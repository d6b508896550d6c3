use num_bigint::BigInt;
use thiserror::Error;

/// Startup problems. Any of these aborts the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Errors coming back from the block explorer or market data API.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Rate limited by explorer: {0}")]
    RateLimited(String),
    #[error("Explorer returned an error: {0}")]
    Api(String),
    #[error("Unparseable {field} in {payload}")]
    Parse { field: &'static str, payload: String },
    #[error("Block {block} alone fills a page of {page_size} transfers; raise EXPLORER_PAGE_SIZE")]
    BlockOverflow { block: u64, page_size: usize },
}

impl SourceError {
    /// Transient errors leave the cursor untouched and are retried next cycle.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            SourceError::Parse { .. } | SourceError::BlockOverflow { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] clickhouse::error::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Corrupt stored value in {table}.{column}: {value}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

impl StoreError {
    /// A dropped connection or timeout mid-cycle. The pool is retried next
    /// cycle; anything else means the store itself is unusable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(clickhouse::error::Error::Network(_))
                | StoreError::Database(clickhouse::error::Error::TimedOut)
        )
    }
}

/// Replayed state that cannot be right. Publication is withheld when raised.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("pool {pool}: {count} non-excluded address(es) replayed to a negative balance (first: {address} = {balance})")]
    NegativeBalance {
        pool: String,
        count: usize,
        address: String,
        balance: BigInt,
    },
    #[error("circulating supply would be negative ({0})")]
    NegativeCirculation(BigInt),
}

/// Everything that can go wrong inside one materialization step.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}

impl EngineError {
    /// Storage failures abort the whole batch run, except transient ones.
    /// Everything else is isolated to the pool (or stats step) that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(e) if !e.is_transient())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Unknown pool: {0}")]
    UnknownPool(String),
    #[error("No stats have been recorded yet")]
    NoStats,
    #[error("{what} must be greater than 0 and less than {max}")]
    OutOfBounds { what: &'static str, max: String },
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Storage(e.to_string())
    }
}
