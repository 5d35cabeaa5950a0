//! # Account Service
//!
//! Per-user and per-market reads built on the margin math:
//!
//! | Operation | Reads | Computation |
//! |-----------|-------|-------------|
//! | `get_rates` | spot markets (cached) | interest curve |
//! | `get_balances` | vault, risk account, markets | signed token amount |
//! | `get_health` | vault, risk account, markets | maintenance valuation |
//! | `get_withdraw_limits` | vault, risk account, markets | withdrawal limit |
//!
//! Every ledger read goes through the backoff retry policy. Market indices
//! are validated by the caller before any of these run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use crate::cache::TtlCache;
use crate::errors::ServiceError;
use crate::margin::limits::withdrawal_limit;
use crate::margin::rates::rates;
use crate::margin::valuation::valuate;
use crate::margin::{signed_token_amount, MarginCategory, RATE_PRECISION};
use crate::protocol::accounts::{RemoteRiskAccount, SpotMarket, VaultAccount};
use crate::protocol::ProtocolIds;
use crate::solana::LedgerClient;
use crate::utils::fixed_to_decimal;

/// Annual deposit and borrow rates of one market, as fractions (0.05 = 5%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketRates {
    pub deposit_rate: f64,
    pub borrow_rate: f64,
}

/// A user's vault together with its paired risk account.
#[derive(Debug, Clone)]
pub struct UserAccounts {
    pub vault: VaultAccount,
    pub risk_account: RemoteRiskAccount,
}

/// Reads and derived values for individual users and markets.
#[derive(Clone)]
pub struct AccountService {
    ledger: Arc<dyn LedgerClient>,
    ids: ProtocolIds,
    retry: RetryPolicy,
    rates: Arc<TtlCache<u16, MarketRates>>,
}

impl AccountService {
    /// Create a new AccountService.
    ///
    /// ## Arguments
    ///
    /// * `ledger` - Ledger client
    /// * `ids` - Program ids
    /// * `retry` - Retry policy for ledger reads
    /// * `rate_ttl` - Freshness window of cached market rates
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        ids: ProtocolIds,
        retry: RetryPolicy,
        rate_ttl: Duration,
    ) -> Self {
        Self::with_rate_cache(ledger, ids, retry, TtlCache::new(rate_ttl))
    }

    pub fn with_rate_cache(
        ledger: Arc<dyn LedgerClient>,
        ids: ProtocolIds,
        retry: RetryPolicy,
        rates: TtlCache<u16, MarketRates>,
    ) -> Self {
        Self {
            ledger,
            ids,
            retry,
            rates: Arc::new(rates),
        }
    }

    // ==========================================
    // LOADERS
    // ==========================================

    /// Fetch and decode the spot markets for `indices` in one batch.
    ///
    /// ## Returns
    ///
    /// * `Ok(HashMap)` - Markets keyed by index
    /// * `Err(ServiceError::Consistency)` - A market account is missing or malformed
    pub async fn load_markets(&self, indices: &[u16]) -> Result<HashMap<u16, SpotMarket>, ServiceError> {
        let addresses: Vec<Pubkey> = indices.iter().map(|i| self.ids.spot_market(*i)).collect();
        let accounts = self
            .retry
            .run(|| self.ledger.get_multiple_accounts(&addresses))
            .await?;

        decode_markets(indices, &addresses, accounts)
    }

    /// Fetch a user's vault and risk account in one batch.
    ///
    /// ## Returns
    ///
    /// * `Ok(UserAccounts)` - Both accounts decoded
    /// * `Err(ServiceError::NotAUser)` - Either account does not exist
    pub async fn load_user(&self, owner: &Pubkey) -> Result<UserAccounts, ServiceError> {
        let vault_address = self.ids.vault(owner);
        let risk_address = self.ids.risk_account(&vault_address);
        let addresses = [vault_address, risk_address];

        let accounts = self
            .retry
            .run(|| self.ledger.get_multiple_accounts(&addresses))
            .await?;

        let mut accounts = accounts.into_iter();
        let (Some(Some(vault)), Some(Some(risk))) = (accounts.next(), accounts.next()) else {
            return Err(ServiceError::NotAUser(owner.to_string()));
        };

        Ok(UserAccounts {
            vault: VaultAccount::decode(vault_address, &vault.data)?,
            risk_account: RemoteRiskAccount::decode(risk_address, &risk.data)?,
        })
    }

    /// Load a user and every market needed to value them plus `extra`.
    async fn load_user_with_markets(
        &self,
        owner: &Pubkey,
        extra: &[u16],
    ) -> Result<(UserAccounts, HashMap<u16, SpotMarket>), ServiceError> {
        let user = self.load_user(owner).await?;

        let mut indices: Vec<u16> = extra.to_vec();
        for position in &user.risk_account.positions {
            if !indices.contains(&position.market_index) {
                indices.push(position.market_index);
            }
        }

        let markets = self.load_markets(&indices).await?;
        Ok((user, markets))
    }

    // ==========================================
    // OPERATIONS
    // ==========================================

    /// Deposit and borrow rates for `indices`, served from cache when fresh.
    ///
    /// Stale markets are fetched together in one batch.
    pub async fn get_rates(&self, indices: &[u16]) -> Result<Vec<(u16, MarketRates)>, ServiceError> {
        let rates = self
            .rates
            .get_or_fetch_many(indices, |stale| async move {
                debug!("Refreshing rates for markets {:?}", stale);
                let markets = self.load_markets(&stale).await?;
                markets
                    .iter()
                    .map(|(index, market)| Ok((*index, market_rates(market)?)))
                    .collect::<Result<HashMap<_, _>, ServiceError>>()
            })
            .await?;

        collect_in_order(indices, &rates)
    }

    /// Signed balance (negative for borrows) of each market, in token base units.
    pub async fn get_balances(
        &self,
        owner: &Pubkey,
        indices: &[u16],
    ) -> Result<Vec<(u16, i128)>, ServiceError> {
        let (user, markets) = self.load_user_with_markets(owner, indices).await?;

        indices
            .iter()
            .map(|index| {
                let balance = match user.risk_account.position(*index) {
                    Some(position) => {
                        let market = markets.get(index).ok_or_else(|| {
                            ServiceError::Consistency(format!("Spot market {} not loaded", index))
                        })?;
                        signed_token_amount(position, market)?
                    }
                    None => 0,
                };
                Ok((*index, balance))
            })
            .collect()
    }

    /// Health of a user after the safety buffer, in `[0, 100]`.
    pub async fn get_health(&self, owner: &Pubkey) -> Result<u8, ServiceError> {
        let (user, markets) = self.load_user_with_markets(owner, &[]).await?;
        let valuation = valuate(&user.risk_account, &markets, MarginCategory::Maintenance)?;

        info!(
            "Health of {} (vault {}): raw {} adjusted {}",
            owner,
            user.vault.vault_address,
            valuation.health_raw,
            valuation.adjusted_health()
        );

        Ok(valuation.adjusted_health())
    }

    /// Largest withdrawal per market, in token base units.
    pub async fn get_withdraw_limits(
        &self,
        owner: &Pubkey,
        indices: &[u16],
    ) -> Result<Vec<(u16, u64)>, ServiceError> {
        let (user, markets) = self.load_user_with_markets(owner, indices).await?;

        indices
            .iter()
            .map(|index| Ok((*index, withdrawal_limit(&user.risk_account, &markets, *index)?)))
            .collect()
    }
}

fn market_rates(market: &SpotMarket) -> Result<MarketRates, ServiceError> {
    let rates = rates(market)?;
    let decimals = RATE_PRECISION.ilog10();

    Ok(MarketRates {
        deposit_rate: fixed_to_decimal(rates.deposit_rate as i128, decimals),
        borrow_rate: fixed_to_decimal(rates.borrow_rate as i128, decimals),
    })
}

fn decode_markets(
    indices: &[u16],
    addresses: &[Pubkey],
    accounts: Vec<Option<solana_sdk::account::Account>>,
) -> Result<HashMap<u16, SpotMarket>, ServiceError> {
    let mut markets = HashMap::with_capacity(indices.len());

    for ((index, address), account) in indices.iter().zip(addresses).zip(accounts) {
        let account = account.ok_or_else(|| {
            ServiceError::Consistency(format!("Spot market {} not found at {}", index, address))
        })?;
        markets.insert(*index, SpotMarket::decode(*address, &account.data)?);
    }

    Ok(markets)
}

fn collect_in_order<V: Copy>(indices: &[u16], values: &HashMap<u16, V>) -> Result<Vec<(u16, V)>, ServiceError> {
    indices
        .iter()
        .map(|index| {
            values
                .get(index)
                .map(|value| (*index, *value))
                .ok_or_else(|| ServiceError::Consistency(format!("No rates for market {}", index)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::protocol::accounts::BalanceSide;
    use crate::solana::RpcError;
    use crate::testing::{sol_market, test_ids, usdc_market, FakeLedger};
    use chrono::Utc;

    fn service(ledger: Arc<FakeLedger>) -> AccountService {
        AccountService::new(
            ledger,
            test_ids(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(60),
        )
    }

    fn seeded_ledger() -> Arc<FakeLedger> {
        let ledger = Arc::new(FakeLedger::new());
        let ids = test_ids();
        let mut usdc = usdc_market();
        usdc.deposit_balance = 1_000 * 1_000_000 * 1_000;
        usdc.borrow_balance = 400 * 1_000_000 * 1_000;
        usdc.optimal_utilization = 800_000;
        usdc.optimal_borrow_rate = 100_000;
        usdc.max_borrow_rate = 1_000_000;
        ledger.insert_spot_market(&ids, &usdc);
        ledger.insert_spot_market(&ids, &sol_market(100_000_000));
        ledger
    }

    #[tokio::test]
    async fn test_rates_are_cached_per_market() {
        let ledger = seeded_ledger();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = AccountService::with_rate_cache(
            ledger.clone(),
            test_ids(),
            RetryPolicy::default(),
            TtlCache::with_clock(Duration::from_secs(60), clock.clone()),
        );

        let rates = service.get_rates(&[0]).await.unwrap();
        assert_eq!(rates[0].0, 0);
        assert!((rates[0].1.borrow_rate - 0.05).abs() < 1e-9);
        assert!((rates[0].1.deposit_rate - 0.02).abs() < 1e-9);

        // market 0 is fresh, only market 1 is fetched
        let rates = service.get_rates(&[1, 0]).await.unwrap();
        assert_eq!(rates.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(ledger.calls("getMultipleAccounts"), 2);

        clock.advance(Duration::from_secs(30));
        service.get_rates(&[0, 1]).await.unwrap();
        assert_eq!(ledger.calls("getMultipleAccounts"), 2);
    }

    #[tokio::test]
    async fn test_balances_are_signed() {
        let ledger = seeded_ledger();
        let ids = test_ids();
        let owner = Pubkey::new_unique();
        ledger.insert_vault(&ids, &owner);
        ledger.insert_risk_account(
            &ids,
            &owner,
            &[(1, 2_000_000_000, BalanceSide::Deposit), (0, 50_000_000_000, BalanceSide::Borrow)],
        );

        let balances = service(ledger).get_balances(&owner, &[0, 1]).await.unwrap();
        assert_eq!(balances, vec![(0, -50_000_000), (1, 2_000_000_000)]);
    }

    #[tokio::test]
    async fn test_health_uses_maintenance_weights() {
        let ledger = seeded_ledger();
        let ids = test_ids();
        let owner = Pubkey::new_unique();
        ledger.insert_vault(&ids, &owner);
        // 10 SOL at $100 (maintenance weight 0.9) = $900, 200 USDC borrowed
        ledger.insert_risk_account(
            &ids,
            &owner,
            &[(1, 10_000_000_000, BalanceSide::Deposit), (0, 200_000_000_000, BalanceSide::Borrow)],
        );

        // raw = round(100 * (1 - 200 / 900)) = 78, adjusted = (78 - 10) * 100 / 90 = 75
        assert_eq!(service(ledger).get_health(&owner).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_not_a_user() {
        let ledger = seeded_ledger();
        let owner = Pubkey::new_unique();
        ledger.insert_vault(&test_ids(), &owner);

        let err = service(ledger).get_health(&owner).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotAUser(_)));
    }

    #[tokio::test]
    async fn test_withdraw_limits_retry_transient_failure() {
        let ledger = seeded_ledger();
        let ids = test_ids();
        let owner = Pubkey::new_unique();
        ledger.insert_vault(&ids, &owner);
        ledger.insert_risk_account(&ids, &owner, &[(0, 100_000_000_000, BalanceSide::Deposit)]);
        ledger.fail_next("getMultipleAccounts", RpcError::Unavailable("503".into()));

        let limits = service(ledger.clone()).get_withdraw_limits(&owner, &[0]).await.unwrap();
        assert_eq!(limits, vec![(0, 100_000_000)]);
        assert_eq!(ledger.calls("getMultipleAccounts"), 3);
    }

    #[tokio::test]
    async fn test_missing_market_is_consistency_fault() {
        let ledger = Arc::new(FakeLedger::new());
        let err = service(ledger).load_markets(&[0]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }
}
