//! # Vault Aggregator
//!
//! Protocol-wide exposure (TVL) across every vault.
//!
//! ## Aggregation Flow
//!
//! ```text
//! 1. List every vault account (retried)
//!               ↓
//! 2. Derive each paired risk account address
//!               ↓
//! 3. Fetch all risk accounts + spot markets in one batch (retried)
//!               ↓
//! 4. Missing risk account?  Strict   -> fail with the vault address
//!                           Tolerant -> skip, warn with the count
//!               ↓
//! 5. Value each account (initial weights), fold into i128 totals
//!               ↓
//! 6. Round totals to cents once; net = collateral - loans (both rounded)
//! ```
//!
//! Net is taken from the rounded totals, so it can differ by a cent from
//! rounding the raw difference. Existing consumers rely on this.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use super::retry::RetryPolicy;
use crate::errors::ServiceError;
use crate::margin::valuation::{valuate, Valuation};
use crate::margin::MarginCategory;
use crate::protocol::accounts::{RemoteRiskAccount, SpotMarket, VaultAccount, VAULT_ACCOUNT};
use crate::protocol::markets::supported_market_indices;
use crate::protocol::{account_discriminator, ProtocolIds};
use crate::solana::LedgerClient;
use crate::utils::{base_units_to_cents, cents_to_usd};

/// What to do with a vault whose risk account is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    /// Fail the whole aggregation.
    #[default]
    Strict,
    /// Skip the vault and log how many were skipped.
    Tolerant,
}

impl FromStr for AggregationPolicy {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(AggregationPolicy::Strict),
            "tolerant" => Ok(AggregationPolicy::Tolerant),
            _ => Err(ServiceError::InvalidInput("Invalid aggregation policy".to_string())),
        }
    }
}

/// Protocol-wide totals in USD, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateExposure {
    pub collateral: f64,
    pub loans: f64,
    pub net: f64,
}

/// Vault owners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserList {
    pub count: usize,
    pub users: Vec<String>,
}

/// Aggregates state across all vaults.
#[derive(Clone)]
pub struct VaultAggregator {
    ledger: Arc<dyn LedgerClient>,
    ids: ProtocolIds,
    retry: RetryPolicy,
}

impl VaultAggregator {
    pub fn new(ledger: Arc<dyn LedgerClient>, ids: ProtocolIds, retry: RetryPolicy) -> Self {
        Self { ledger, ids, retry }
    }

    /// Every vault of the lending program.
    pub async fn list_vaults(&self) -> Result<Vec<VaultAccount>, ServiceError> {
        let discriminator = account_discriminator(VAULT_ACCOUNT);
        let accounts = self
            .retry
            .run(|| self.ledger.get_program_accounts(&self.ids.vault_program, discriminator))
            .await?;

        let vaults = accounts
            .into_iter()
            .map(|(address, account)| VaultAccount::decode(address, &account.data))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vaults)
    }

    /// Owners of every vault.
    pub async fn list_users(&self) -> Result<UserList, ServiceError> {
        let users: Vec<String> = self
            .list_vaults()
            .await?
            .into_iter()
            .map(|vault| vault.owner.to_string())
            .collect();

        Ok(UserList {
            count: users.len(),
            users,
        })
    }

    /// Total collateral, loans and net exposure across all vaults.
    ///
    /// ## Arguments
    ///
    /// * `policy` - Handling of vaults without a risk account
    ///
    /// ## Returns
    ///
    /// * `Ok(AggregateExposure)` - Totals in USD
    /// * `Err(ServiceError::Consistency)` - Strict policy and a risk account
    ///   is missing, or a spot market is missing
    /// * `Err(ServiceError::Rpc)` - Ledger reads failed after retries
    pub async fn compute_aggregate_exposure(
        &self,
        policy: AggregationPolicy,
    ) -> Result<AggregateExposure, ServiceError> {
        let vaults = self.list_vaults().await?;
        let market_indices = supported_market_indices();

        let risk_addresses: Vec<Pubkey> = vaults
            .iter()
            .map(|vault| self.ids.risk_account(&vault.vault_address))
            .collect();
        let market_addresses: Vec<Pubkey> = market_indices
            .iter()
            .map(|index| self.ids.spot_market(*index))
            .collect();

        let mut addresses = risk_addresses.clone();
        addresses.extend_from_slice(&market_addresses);

        let mut accounts = self
            .retry
            .run(|| self.ledger.get_multiple_accounts(&addresses))
            .await?;
        let market_accounts = accounts.split_off(risk_addresses.len());

        let mut markets: HashMap<u16, SpotMarket> = HashMap::with_capacity(market_indices.len());
        for ((index, address), account) in market_indices.iter().zip(&market_addresses).zip(market_accounts) {
            let account = account.ok_or_else(|| {
                ServiceError::Consistency(format!("Spot market {} not found at {}", index, address))
            })?;
            markets.insert(*index, SpotMarket::decode(*address, &account.data)?);
        }

        let mut risk_accounts = Vec::with_capacity(vaults.len());
        let mut skipped = 0usize;
        for ((vault, address), account) in vaults.iter().zip(&risk_addresses).zip(accounts) {
            match account {
                Some(account) => risk_accounts.push(RemoteRiskAccount::decode(*address, &account.data)?),
                None if policy == AggregationPolicy::Strict => {
                    return Err(ServiceError::Consistency(format!(
                        "Failed to fetch risk account for vault {}",
                        vault.vault_address
                    )));
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {} vaults without a risk account", skipped);
        }

        let valuations = risk_accounts
            .iter()
            .map(|account| valuate(account, &markets, MarginCategory::Initial))
            .collect::<Result<Vec<_>, _>>()?;

        let exposure = fold_exposure(&valuations)?;

        info!(
            "Aggregate exposure over {} vaults: collateral ${} loans ${} net ${}",
            valuations.len(),
            exposure.collateral,
            exposure.loans,
            exposure.net
        );

        Ok(exposure)
    }
}

/// Sum valuations in base units and round the totals once.
pub fn fold_exposure(valuations: &[Valuation]) -> Result<AggregateExposure, ServiceError> {
    let mut collateral: i128 = 0;
    let mut loans: i128 = 0;

    for valuation in valuations {
        collateral = collateral
            .checked_add(valuation.total_collateral)
            .ok_or_else(|| ServiceError::Consistency("Collateral total overflowed".to_string()))?;
        loans = loans
            .checked_add(valuation.total_liability)
            .ok_or_else(|| ServiceError::Consistency("Loan total overflowed".to_string()))?;
    }

    let collateral_cents = base_units_to_cents(collateral);
    let loan_cents = base_units_to_cents(loans);

    Ok(AggregateExposure {
        collateral: cents_to_usd(collateral_cents),
        loans: cents_to_usd(loan_cents),
        net: cents_to_usd(collateral_cents - loan_cents),
    })
}
