pub mod commands;
pub mod engine;
pub mod excluded_accounts;
pub mod explorer;
pub mod fetcher;
pub mod ledger;
pub mod monitor;
pub mod prices;
pub mod query;
pub mod snapshot;
pub mod stats;
