use std::collections::HashMap;

use crate::config::LedgerConfig;
use crate::db::LedgerStore;
use crate::error::StoreError;
use crate::types::models::{ExcludedAccount, ExclusionCategory};

/// Addresses that never show up as holders. Built once from the static
/// configuration and shared read-only by every pool.
#[derive(Debug, Clone, Default)]
pub struct AddressExclusionSet {
    accounts: HashMap<String, ExcludedAccount>,
}

impl AddressExclusionSet {
    pub fn from_config(config: &LedgerConfig) -> Self {
        let mut set = Self::default();

        set.insert(&config.team_address, ExclusionCategory::Team, "Team wallet");
        set.insert(&config.treasury_address, ExclusionCategory::Treasury, "Treasury wallet");
        set.insert(&config.token_contract, ExclusionCategory::Contract, "Token contract");
        for pool in &config.pools {
            set.insert(
                &pool.contract,
                ExclusionCategory::Contract,
                &format!("Pool contract ({})", pool.id),
            );
            if let Some(account) = &pool.account {
                set.insert(
                    account,
                    ExclusionCategory::Contract,
                    &format!("Pool account ({})", pool.id),
                );
            }
        }
        for address in &config.mint_addresses {
            set.insert(address, ExclusionCategory::Mint, "Mint/burn source");
        }
        for address in &config.extra_exclusions {
            set.insert(address, ExclusionCategory::Configured, "Configured exclusion");
        }

        set
    }

    /// First category wins: the team wallet stays "team" even when it is also
    /// listed in the extra exclusions.
    fn insert(&mut self, address: &str, category: ExclusionCategory, description: &str) {
        let address = address.to_ascii_lowercase();
        self.accounts
            .entry(address.clone())
            .or_insert_with(|| ExcludedAccount {
                address,
                category,
                description: description.to_string(),
            });
    }

    pub fn contains(&self, address: &str) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn category(&self, address: &str) -> Option<ExclusionCategory> {
        self.accounts.get(address).map(|a| a.category)
    }

    /// Sorted by address.
    pub fn accounts(&self) -> Vec<ExcludedAccount> {
        let mut accounts: Vec<_> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Mirrors the exclusion set into `excluded_accounts` so it can be inspected
/// next to the published holders.
pub async fn sync_excluded_accounts(
    store: &dyn LedgerStore,
    exclusions: &AddressExclusionSet,
) -> Result<(), StoreError> {
    let accounts = exclusions.accounts();
    store.replace_excluded_accounts(&accounts).await?;
    tracing::info!("Synced {} excluded accounts", accounts.len());
    Ok(())
}
