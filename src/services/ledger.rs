//! Full-history balance replay.
//!
//! Balances are never carried over between cycles. Every cycle folds the
//! whole ordered event log of a pool from an empty map, so the result only
//! depends on what is stored and a crash at any point leaves nothing to
//! repair.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::types::models::TransferEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub balance: BigInt,
    pub first_block_number: u64,
    pub first_timestamp: DateTime<Utc>,
}

/// Replayed state of one pool: address -> signed balance in base units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    applied: u64,
    skipped_self_transfers: u64,
}

impl Ledger {
    fn entry(&mut self, address: &str, event: &TransferEvent) -> &mut LedgerEntry {
        self.entries
            .entry(address.to_string())
            .or_insert_with(|| LedgerEntry {
                balance: BigInt::zero(),
                first_block_number: event.block_number,
                first_timestamp: event.timestamp,
            })
    }

    fn apply(&mut self, event: &TransferEvent) {
        if event.is_self_transfer() {
            self.skipped_self_transfers += 1;
            return;
        }
        self.entry(&event.from_address, event).balance -= &event.raw_value;
        self.entry(&event.to_address, event).balance += &event.raw_value;
        self.applied += 1;
    }

    pub fn entries(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.entries
    }

    pub fn balance(&self, address: &str) -> Option<&BigInt> {
        self.entries.get(address).map(|e| &e.balance)
    }

    pub fn balances(&self) -> BTreeMap<String, BigInt> {
        self.entries
            .iter()
            .map(|(address, entry)| (address.clone(), entry.balance.clone()))
            .collect()
    }

    /// Sum over every address. Zero for any well-formed history.
    pub fn total(&self) -> BigInt {
        self.entries.values().map(|e| &e.balance).sum()
    }

    pub fn negative_balances(&self) -> impl Iterator<Item = (&String, &BigInt)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.balance.is_negative())
            .map(|(address, e)| (address, &e.balance))
    }

    pub fn applied_events(&self) -> u64 {
        self.applied
    }

    pub fn skipped_self_transfers(&self) -> u64 {
        self.skipped_self_transfers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Folds `events` in the order given. Callers pass the stored history, which
/// is already sorted by `(block_number, ingest_seq)`.
pub fn replay<'a, I>(events: I) -> Ledger
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let mut ledger = Ledger::default();
    for event in events {
        ledger.apply(event);
    }
    ledger
}
