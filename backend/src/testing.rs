//! In-memory doubles and fixtures shared by the unit tests.
//!
//! `FakeLedger` answers every `LedgerClient` read from a map of accounts,
//! counts calls per RPC method and can be told to fail the next call of a
//! method, which is how retry and error paths are exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use solana_sdk::{account::Account, hash::Hash, pubkey::Pubkey, transaction::VersionedTransaction};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::integrations::{Cms, CmsItemFields, IntegrationError, Mailer, Spreadsheet};
use crate::protocol::accounts::{
    spot_market_layout as L, BalanceSide, SpotMarket, RISK_ACCOUNT, RISK_ACCOUNT_MIN_LEN,
    SPOT_MARKET_ACCOUNT, SPOT_POSITIONS_OFFSET, SPOT_POSITION_LEN, VAULT_ACCOUNT, VAULT_MIN_LEN,
};
use crate::protocol::markets::{market_config, SOL_MARKET_INDEX, USDC_MARKET_INDEX};
use crate::protocol::{account_discriminator, ProtocolIds};
use crate::services::price_feed::PriceSource;
use crate::solana::{LedgerClient, RpcError};
use crate::AppState;

/// Rent for a 165-byte token account on mainnet.
pub const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

pub fn test_ids() -> ProtocolIds {
    ProtocolIds::from_config(&AppConfig::default()).unwrap()
}

/// App state over `ledger`, with no integrations and an empty price source.
pub fn test_app_state(ledger: Arc<FakeLedger>) -> Arc<AppState> {
    let state = AppState::new(AppConfig::default(), ledger, Arc::new(FakePriceSource::new(&[]))).unwrap();
    Arc::new(state)
}

// ==========================================
// LEDGER
// ==========================================

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    balances: HashMap<Pubkey, u64>,
    token_balances: HashMap<Pubkey, u64>,
    rent: Option<u64>,
    simulated_units: Option<u64>,
    priority_fees: Vec<u64>,
    failures: HashMap<&'static str, VecDeque<RpcError>>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory ledger.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, address: Pubkey, account: Account) {
        self.state.lock().unwrap().accounts.insert(address, account);
    }

    /// Vault of `owner`, owned by the vault program.
    pub fn insert_vault(&self, ids: &ProtocolIds, owner: &Pubkey) {
        self.insert_account(
            ids.vault(owner),
            Account {
                data: encode_vault(owner),
                owner: ids.vault_program,
                ..Account::default()
            },
        );
    }

    /// Risk account paired with the vault of `owner`, replacing any previous one.
    pub fn insert_risk_account(
        &self,
        ids: &ProtocolIds,
        owner: &Pubkey,
        positions: &[(u16, u64, BalanceSide)],
    ) {
        let vault = ids.vault(owner);
        self.insert_account(
            ids.risk_account(&vault),
            Account {
                data: encode_risk_account(&vault, positions),
                owner: ids.margin_program,
                ..Account::default()
            },
        );
    }

    pub fn insert_spot_market(&self, ids: &ProtocolIds, market: &SpotMarket) {
        self.insert_account(
            ids.spot_market(market.market_index),
            Account {
                data: encode_spot_market(market),
                owner: ids.margin_program,
                ..Account::default()
            },
        );
    }

    pub fn set_balance(&self, address: &Pubkey, lamports: u64) {
        self.state.lock().unwrap().balances.insert(*address, lamports);
    }

    pub fn set_token_balance(&self, address: &Pubkey, amount: u64) {
        self.state.lock().unwrap().token_balances.insert(*address, amount);
    }

    pub fn set_rent(&self, lamports: u64) {
        self.state.lock().unwrap().rent = Some(lamports);
    }

    pub fn set_simulated_units(&self, units: Option<u64>) {
        self.state.lock().unwrap().simulated_units = units;
    }

    pub fn set_priority_fees(&self, fees: Vec<u64>) {
        self.state.lock().unwrap().priority_fees = fees;
    }

    /// Make the next call of `method` fail with `err`. Queues up.
    pub fn fail_next(&self, method: &'static str, err: RpcError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(method)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// Count the call, then pop a queued failure if there is one.
    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, LedgerState>, RpcError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(method).or_default() += 1;
        if let Some(err) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Account)>, RpcError> {
        let state = self.enter("getProgramAccounts")?;
        let mut accounts: Vec<(Pubkey, Account)> = state
            .accounts
            .iter()
            .filter(|(_, account)| account.owner == *program_id && account.data.starts_with(&discriminator))
            .map(|(address, account)| (*address, account.clone()))
            .collect();
        accounts.sort_by_key(|(address, _)| *address);
        Ok(accounts)
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, RpcError> {
        let state = self.enter("getMultipleAccounts")?;
        Ok(addresses.iter().map(|a| state.accounts.get(a).cloned()).collect())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let state = self.enter("getBalance")?;
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }

    async fn get_token_account_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let state = self.enter("getTokenAccountBalance")?;
        state
            .token_balances
            .get(address)
            .copied()
            .ok_or_else(|| RpcError::Request(format!("could not find account {}", address)))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, _data_len: usize) -> Result<u64, RpcError> {
        let state = self.enter("getMinimumBalanceForRentExemption")?;
        Ok(state.rent.unwrap_or(TOKEN_ACCOUNT_RENT))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.enter("getLatestBlockhash")?;
        Ok(Hash::new_unique())
    }

    async fn simulate_compute_units(
        &self,
        _transaction: &VersionedTransaction,
    ) -> Result<Option<u64>, RpcError> {
        let state = self.enter("simulateTransaction")?;
        Ok(state.simulated_units)
    }

    async fn get_recent_prioritization_fees(&self, _accounts: &[Pubkey]) -> Result<Vec<u64>, RpcError> {
        let state = self.enter("getRecentPrioritizationFees")?;
        Ok(state.priority_fees.clone())
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        self.enter("getSlot")?;
        Ok(312_000_000)
    }
}

// ==========================================
// ACCOUNT ENCODERS
// ==========================================

pub fn encode_vault(owner: &Pubkey) -> Vec<u8> {
    let mut data = vec![0u8; VAULT_MIN_LEN];
    data[..8].copy_from_slice(&account_discriminator(VAULT_ACCOUNT));
    data[8..40].copy_from_slice(owner.as_ref());
    data
}

/// Risk account with one slot per position; zero balances leave the slot empty.
pub fn encode_risk_account(authority: &Pubkey, positions: &[(u16, u64, BalanceSide)]) -> Vec<u8> {
    let mut data = vec![0u8; RISK_ACCOUNT_MIN_LEN];
    data[..8].copy_from_slice(&account_discriminator(RISK_ACCOUNT));
    data[8..40].copy_from_slice(authority.as_ref());

    for (slot, (market_index, scaled_balance, side)) in positions.iter().enumerate() {
        if *scaled_balance == 0 {
            continue;
        }
        let base = SPOT_POSITIONS_OFFSET + slot * SPOT_POSITION_LEN;
        data[base..base + 8].copy_from_slice(&scaled_balance.to_le_bytes());
        data[base + 32..base + 34].copy_from_slice(&market_index.to_le_bytes());
        data[base + 34] = match side {
            BalanceSide::Deposit => 0,
            BalanceSide::Borrow => 1,
        };
    }
    data
}

pub fn encode_spot_market(market: &SpotMarket) -> Vec<u8> {
    let mut data = vec![0u8; L::MIN_LEN];
    data[..8].copy_from_slice(&account_discriminator(SPOT_MARKET_ACCOUNT));

    let mut put = |offset: usize, bytes: &[u8]| data[offset..offset + bytes.len()].copy_from_slice(bytes);
    put(L::PUBKEY, market.pubkey.as_ref());
    put(L::ORACLE, market.oracle.as_ref());
    put(L::MINT, market.mint.as_ref());
    put(L::ORACLE_PRICE, &market.oracle_price.to_le_bytes());
    put(L::DEPOSIT_BALANCE, &market.deposit_balance.to_le_bytes());
    put(L::BORROW_BALANCE, &market.borrow_balance.to_le_bytes());
    put(L::CUMULATIVE_DEPOSIT_INTEREST, &market.cumulative_deposit_interest.to_le_bytes());
    put(L::CUMULATIVE_BORROW_INTEREST, &market.cumulative_borrow_interest.to_le_bytes());
    put(L::OPTIMAL_UTILIZATION, &market.optimal_utilization.to_le_bytes());
    put(L::OPTIMAL_BORROW_RATE, &market.optimal_borrow_rate.to_le_bytes());
    put(L::MAX_BORROW_RATE, &market.max_borrow_rate.to_le_bytes());
    put(L::INITIAL_ASSET_WEIGHT, &market.initial_asset_weight.to_le_bytes());
    put(L::MAINTENANCE_ASSET_WEIGHT, &market.maintenance_asset_weight.to_le_bytes());
    put(L::INITIAL_LIABILITY_WEIGHT, &market.initial_liability_weight.to_le_bytes());
    put(L::MAINTENANCE_LIABILITY_WEIGHT, &market.maintenance_liability_weight.to_le_bytes());
    put(L::MARKET_INDEX, &market.market_index.to_le_bytes());
    put(L::DECIMALS, &[market.decimals]);
    data
}

// ==========================================
// MARKET FIXTURES
// ==========================================

/// USDC at $1, unit weights, interest index 1.0, 1M USDC deposited.
pub fn usdc_market() -> SpotMarket {
    SpotMarket {
        pubkey: test_ids().spot_market(USDC_MARKET_INDEX),
        oracle: Pubkey::new_from_array([1; 32]),
        mint: market_config(USDC_MARKET_INDEX).unwrap().mint,
        oracle_price: 1_000_000,
        deposit_balance: 1_000_000_000_000_000,
        borrow_balance: 0,
        cumulative_deposit_interest: 10_000_000_000,
        cumulative_borrow_interest: 10_000_000_000,
        optimal_utilization: 800_000,
        optimal_borrow_rate: 100_000,
        max_borrow_rate: 1_000_000,
        initial_asset_weight: 10_000,
        maintenance_asset_weight: 10_000,
        initial_liability_weight: 10_000,
        maintenance_liability_weight: 10_000,
        market_index: USDC_MARKET_INDEX,
        decimals: 6,
    }
}

/// SOL at `price` (1e6 precision), 0.8 / 0.9 asset and 1.2 / 1.1 liability weights.
pub fn sol_market(price: i64) -> SpotMarket {
    SpotMarket {
        pubkey: test_ids().spot_market(SOL_MARKET_INDEX),
        oracle: Pubkey::new_from_array([2; 32]),
        mint: market_config(SOL_MARKET_INDEX).unwrap().mint,
        oracle_price: price,
        deposit_balance: 100_000_000_000_000,
        borrow_balance: 0,
        cumulative_deposit_interest: 10_000_000_000,
        cumulative_borrow_interest: 10_000_000_000,
        optimal_utilization: 800_000,
        optimal_borrow_rate: 100_000,
        max_borrow_rate: 1_000_000,
        initial_asset_weight: 8_000,
        maintenance_asset_weight: 9_000,
        initial_liability_weight: 12_000,
        maintenance_liability_weight: 11_000,
        market_index: SOL_MARKET_INDEX,
        decimals: 9,
    }
}

pub fn markets_by_index(markets: Vec<SpotMarket>) -> HashMap<u16, SpotMarket> {
    markets.into_iter().map(|m| (m.market_index, m)).collect()
}

// ==========================================
// PRICE SOURCE
// ==========================================

#[derive(Default)]
pub struct FakePriceSource {
    prices: HashMap<String, f64>,
    calls: Mutex<usize>,
    fail_next: Mutex<bool>,
}

impl FakePriceSource {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(id, p)| (id.to_string(), *p)).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl PriceSource for FakePriceSource {
    async fn fetch_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, ServiceError> {
        *self.calls.lock().unwrap() += 1;
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(ServiceError::PriceService("503 Service Unavailable".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.prices.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

// ==========================================
// INTEGRATIONS
// ==========================================

/// Spreadsheet with a single column of cells; records appended rows.
pub struct FakeSpreadsheet {
    column: Vec<String>,
    appended: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeSpreadsheet {
    pub fn new(column: &[&str]) -> Self {
        Self {
            column: column.iter().map(|s| s.to_string()).collect(),
            appended: Mutex::new(Vec::new()),
        }
    }

    pub fn appended(&self) -> Vec<(String, Vec<String>)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl Spreadsheet for FakeSpreadsheet {
    async fn read_rows(&self, _range: &str) -> Result<Vec<Vec<String>>, IntegrationError> {
        Ok(self.column.iter().map(|cell| vec![cell.clone()]).collect())
    }

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), IntegrationError> {
        self.appended.lock().unwrap().push((range.to_string(), row));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCms {
    updates: Mutex<Vec<(String, CmsItemFields)>>,
}

impl FakeCms {
    pub fn updates(&self) -> Vec<(String, CmsItemFields)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cms for FakeCms {
    async fn update_item(&self, item_id: &str, fields: CmsItemFields) -> Result<(), IntegrationError> {
        self.updates.lock().unwrap().push((item_id.to_string(), fields));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<(u32, String, String, Value)>>,
}

impl FakeMailer {
    pub fn sent(&self) -> Vec<(u32, String, String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_template(
        &self,
        template_id: u32,
        email: &str,
        name: &str,
        params: Value,
    ) -> Result<(), IntegrationError> {
        self.sent
            .lock()
            .unwrap()
            .push((template_id, email.to_string(), name.to_string(), params));
        Ok(())
    }
}
