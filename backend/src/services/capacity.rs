//! # Capacity Calculator
//!
//! Maximum safe deposit and withdrawal per market.
//!
//! ## Deposits
//!
//! ```text
//! base asset (SOL):  max(balance - rent(165 bytes) * 2 - fee, 0)
//! other markets:     balance of the owner's associated token account (0 if unreadable)
//! ```
//!
//! The fee is estimated from a simulation of the real deposit sequence
//! (built for 1 lamport), so it tracks what the wallet will actually pay.
//! Two token-account rents are held back: the temporary wrapped-SOL
//! account and a possible new associated account.
//!
//! ## Withdrawals
//!
//! Margin withdrawal limit of the user's risk account, see
//! `margin::limits`.
//!
//! Limits are computed per request and never cached.

use std::sync::Arc;

use futures::future::try_join_all;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use tracing::{debug, info};

use super::account_service::AccountService;
use super::fees::FeeEstimator;
use super::retry::RetryPolicy;
use crate::errors::ServiceError;
use crate::protocol::instructions::{ProtocolInstructions, TOKEN_ACCOUNT_LEN};
use crate::protocol::markets::{is_supported_market, market_config, MarketConfig};
use crate::solana::LedgerClient;

/// Deposit/withdraw headroom calculator.
#[derive(Clone)]
pub struct CapacityCalculator {
    ledger: Arc<dyn LedgerClient>,
    encoder: ProtocolInstructions,
    fees: FeeEstimator,
    accounts: AccountService,
    retry: RetryPolicy,
}

impl CapacityCalculator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        encoder: ProtocolInstructions,
        accounts: AccountService,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fees: FeeEstimator::new(ledger.clone(), retry),
            ledger,
            encoder,
            accounts,
            retry,
        }
    }

    /// Largest amount of `market_index` that `owner` can deposit, in base units.
    ///
    /// ## Returns
    ///
    /// * `Ok(u64)` - The limit, never negative
    /// * `Err(ServiceError::InvalidInput)` - Unsupported market
    /// * `Err(ServiceError::Rpc)` - Balance, rent or fee reads failed (base asset only)
    pub async fn max_deposit(&self, owner: &Pubkey, market_index: u16) -> Result<u64, ServiceError> {
        let market = market_config(market_index)
            .ok_or_else(|| ServiceError::InvalidInput("Unsupported market index".to_string()))?;

        if market.is_base_asset {
            self.max_base_deposit(owner, market).await
        } else {
            Ok(self.token_balance_or_zero(owner, market).await)
        }
    }

    /// Deposit limits for several markets, fetched concurrently, in input order.
    pub async fn max_deposits(
        &self,
        owner: &Pubkey,
        indices: &[u16],
    ) -> Result<Vec<(u16, u64)>, ServiceError> {
        let limits = try_join_all(indices.iter().map(|index| self.max_deposit(owner, *index))).await?;
        Ok(indices.iter().copied().zip(limits).collect())
    }

    /// Withdrawal limits for `indices`, in input order.
    ///
    /// The user's accounts are loaded once for all of them.
    ///
    /// ## Returns
    ///
    /// * `Err(ServiceError::InvalidInput)` - An index is not a supported market (no ledger reads)
    /// * `Err(ServiceError::NotAUser)` - The owner has no vault
    pub async fn max_withdraw(
        &self,
        owner: &Pubkey,
        indices: &[u16],
    ) -> Result<Vec<(u16, u64)>, ServiceError> {
        if !indices.iter().all(|index| is_supported_market(*index)) {
            return Err(ServiceError::InvalidInput("Unsupported market index".to_string()));
        }

        self.accounts.get_withdraw_limits(owner, indices).await
    }

    async fn max_base_deposit(&self, owner: &Pubkey, market: &MarketConfig) -> Result<u64, ServiceError> {
        let instructions = self
            .encoder
            .deposit_ixs(owner, 1, market)
            .map_err(|e| ServiceError::Transaction(e.to_string()))?;

        let (balance, rent, blockhash) = tokio::try_join!(
            self.retry.run(|| self.ledger.get_balance(owner)),
            self.retry
                .run(|| self.ledger.get_minimum_balance_for_rent_exemption(TOKEN_ACCOUNT_LEN)),
            self.retry.run(|| self.ledger.get_latest_blockhash()),
        )?;

        let estimate = self.fees.estimate(owner, &instructions, &[], blockhash).await?;
        let limit = max_base_deposit(balance, rent, estimate.total_fee_lamports);

        info!(
            "Max {} deposit for {}: {} (balance {}, rent {}, fee {})",
            market.symbol, owner, limit, balance, rent, estimate.total_fee_lamports
        );

        Ok(limit)
    }

    async fn token_balance_or_zero(&self, owner: &Pubkey, market: &MarketConfig) -> u64 {
        let token_account = get_associated_token_address(owner, &market.mint);

        match self
            .retry
            .run(|| self.ledger.get_token_account_balance(&token_account))
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                debug!("No readable {} account for {}: {}", market.symbol, owner, e);
                0
            }
        }
    }
}

/// Native balance left after rent for two token accounts and the fee.
pub fn max_base_deposit(balance: u64, token_account_rent: u64, fee: u64) -> u64 {
    balance
        .saturating_sub(token_account_rent.saturating_mul(2))
        .saturating_sub(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::accounts::BalanceSide;
    use crate::protocol::markets::{SOL_MARKET_INDEX, USDC_MARKET_INDEX};
    use crate::solana::RpcError;
    use crate::testing::{sol_market, test_ids, usdc_market, FakeLedger};
    use std::time::Duration;

    fn calculator(ledger: Arc<FakeLedger>) -> CapacityCalculator {
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let ids = test_ids();
        CapacityCalculator::new(
            ledger.clone(),
            ProtocolInstructions::new(ids, Vec::new()),
            AccountService::new(ledger, ids, retry, Duration::from_secs(60)),
            retry,
        )
    }

    #[test]
    fn test_max_base_deposit_never_negative() {
        assert_eq!(max_base_deposit(10_000_000, 2_039_280, 5_000), 10_000_000 - 4_078_560 - 5_000);
        assert_eq!(max_base_deposit(1_000, 2_039_280, 5_000), 0);
        assert_eq!(max_base_deposit(4_080_000, 2_039_280, 5_000), 0);
        assert_eq!(max_base_deposit(0, 0, u64::MAX), 0);
        assert_eq!(max_base_deposit(u64::MAX, u64::MAX, 0), 0);
    }

    #[tokio::test]
    async fn test_sol_deposit_limit_subtracts_rent_and_fee() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        ledger.set_balance(&owner, 1_000_000_000);
        ledger.set_rent(2_039_280);
        ledger.set_simulated_units(Some(100_000));
        ledger.set_priority_fees(vec![1_000]);

        let limit = calculator(ledger.clone()).max_deposit(&owner, SOL_MARKET_INDEX).await.unwrap();

        // fee = 5000 + 1000 * 120_000 / 1e6
        assert_eq!(limit, 1_000_000_000 - 2 * 2_039_280 - 5_120);
        assert_eq!(ledger.calls("simulateTransaction"), 1);
    }

    #[tokio::test]
    async fn test_sol_deposit_limit_when_fee_exceeds_balance() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        ledger.set_balance(&owner, 3_000);

        assert_eq!(calculator(ledger).max_deposit(&owner, SOL_MARKET_INDEX).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_token_deposit_limit_swallows_missing_account() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        let calculator = calculator(ledger.clone());

        assert_eq!(calculator.max_deposit(&owner, USDC_MARKET_INDEX).await.unwrap(), 0);

        let ata = get_associated_token_address(&owner, &market_config(USDC_MARKET_INDEX).unwrap().mint);
        ledger.set_token_balance(&ata, 42_000_000);
        assert_eq!(calculator.max_deposit(&owner, USDC_MARKET_INDEX).await.unwrap(), 42_000_000);
    }

    #[tokio::test]
    async fn test_max_deposits_in_request_order() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        ledger.set_balance(&owner, 0);

        let limits = calculator(ledger).max_deposits(&owner, &[1, 0]).await.unwrap();
        assert_eq!(limits, vec![(1, 0), (0, 0)]);
    }

    #[tokio::test]
    async fn test_base_deposit_propagates_exhausted_rpc_failure() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        for _ in 0..3 {
            ledger.fail_next("getBalance", RpcError::Unavailable("503".into()));
        }

        let err = calculator(ledger.clone()).max_deposit(&owner, SOL_MARKET_INDEX).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rpc(RpcError::Unavailable(_))));
        assert_eq!(ledger.calls("getBalance"), 3);
    }

    #[tokio::test]
    async fn test_max_withdraw_for_unknown_user() {
        let ledger = Arc::new(FakeLedger::new());
        let ids = test_ids();
        ledger.insert_spot_market(&ids, &usdc_market());
        ledger.insert_spot_market(&ids, &sol_market(100_000_000));
        let owner = Pubkey::new_unique();

        let err = calculator(ledger.clone()).max_withdraw(&owner, &[0]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotAUser(_)));

        ledger.insert_vault(&ids, &owner);
        ledger.insert_risk_account(&ids, &owner, &[(1, 1_000_000_000, BalanceSide::Deposit)]);
        let limits = calculator(ledger).max_withdraw(&owner, &[1]).await.unwrap();
        assert_eq!(limits, vec![(1, 1_000_000_000)]);
    }

    #[tokio::test]
    async fn test_max_withdraw_rejects_unsupported_index_before_ledger() {
        let ledger = Arc::new(FakeLedger::new());
        let ids = test_ids();
        let owner = Pubkey::new_unique();
        ledger.insert_vault(&ids, &owner);
        ledger.insert_risk_account(&ids, &owner, &[(1, 1_000_000_000, BalanceSide::Deposit)]);

        let err = calculator(ledger.clone()).max_withdraw(&owner, &[1, 42]).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(ledger.total_calls(), 0);
    }
}
