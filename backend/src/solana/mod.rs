//! # Solana Client Module
//!
//! This module provides the ledger client the risk engine reads from.
//! Services depend on the [`LedgerClient`] trait; [`SolanaClient`] is the
//! production implementation over the Solana RPC.
//!
//! ## Responsibilities
//!
//! - List program accounts (vault enumeration)
//! - Batch fetch accounts by address
//! - Native and token balances, rent minimums
//! - Latest blockhash, compute unit simulation, prioritization fees
//! - Classify failures so callers can tell "node unavailable" apart from
//!   everything else
//!
//! ## Error Classes
//!
//! | Error | Meaning | Retried by services |
//! |-------|---------|---------------------|
//! | `RpcError::Unavailable` | HTTP 503 / "Service Unavailable" | Yes |
//! | `RpcError::Timeout` | Call exceeded `RPC_TIMEOUT_SECS` | Yes |
//! | `RpcError::Request` | Anything else | No |
//!
//! Retrying is the caller's decision (see `services::retry`); this client
//! performs exactly one RPC round trip per method call.

use std::time::Duration;

use actix_web::web;
use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::{ClientError, ClientErrorKind, Result as ClientResult};
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::services::retry::Transient;

/// Maximum number of addresses `getMultipleAccounts` accepts per call.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// Errors returned by the ledger client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The node answered 503 or otherwise reported itself unavailable.
    #[error("RPC node unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("RPC call timed out after {0}s")]
    Timeout(u64),

    /// Any other failure (bad params, missing account, decode errors...).
    #[error("RPC request failed: {0}")]
    Request(String),
}

impl RpcError {
    /// Classify a Solana client error.
    ///
    /// The HTTP status is checked when the transport exposes it; the
    /// message is checked as well because JSON-RPC errors embed the
    /// upstream status in text.
    pub fn from_client_error(context: &str, err: ClientError) -> Self {
        let status_unavailable = match err.kind() {
            ClientErrorKind::Reqwest(e) => e.status().map(|s| s.as_u16()) == Some(503),
            _ => false,
        };
        let message = format!("{}: {}", context, err);

        if status_unavailable || is_unavailable_message(&message) {
            RpcError::Unavailable(message)
        } else {
            RpcError::Request(message)
        }
    }
}

impl Transient for RpcError {
    fn is_transient(&self) -> bool {
        matches!(self, RpcError::Unavailable(_) | RpcError::Timeout(_))
    }
}

/// True when an error message carries the upstream "unavailable" signal.
pub fn is_unavailable_message(message: &str) -> bool {
    message.contains("503") || message.contains("Service Unavailable")
}

/// Read access to the ledger.
///
/// Every method is a single read. None of them mutates chain state, so
/// all of them are safe to retry.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// All accounts owned by `program_id` whose data starts with `discriminator`.
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Account)>, RpcError>;

    /// Fetch many accounts at once; missing accounts are `None`, in input order.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, RpcError>;

    /// Native balance in lamports.
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError>;

    /// SPL token account balance in base units.
    async fn get_token_account_balance(&self, address: &Pubkey) -> Result<u64, RpcError>;

    /// Lamports needed for an account of `data_len` bytes to be rent exempt.
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcError>;

    /// Most recent blockhash.
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Dry-run a transaction and report the compute units it consumed.
    async fn simulate_compute_units(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Option<u64>, RpcError>;

    /// Recent prioritization fees (micro-lamports per compute unit) for
    /// transactions touching `accounts`.
    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>, RpcError>;

    /// Current slot, used as a liveness check.
    async fn get_slot(&self) -> Result<u64, RpcError>;
}

/// Solana RPC client wrapper.
///
/// ## Usage
///
/// ```rust,ignore
/// let config = AppConfig::from_env()?;
/// let client = SolanaClient::new(&config);
///
/// let slot = client.get_slot().await?;
/// ```
#[derive(Clone)]
pub struct SolanaClient {
    /// The RPC endpoint URL.
    rpc_url: String,

    /// Upper bound for one RPC round trip.
    call_timeout: Duration,
}

impl SolanaClient {
    /// Create a new SolanaClient.
    ///
    /// ## Arguments
    ///
    /// * `config` - Application configuration containing the RPC URL
    pub fn new(config: &AppConfig) -> Self {
        info!("Solana client initialized:");
        info!("  RPC: {}", config.solana_rpc_url);
        info!("  Call timeout: {}s", config.rpc_timeout_secs);

        Self {
            rpc_url: config.solana_rpc_url.clone(),
            call_timeout: Duration::from_secs(config.rpc_timeout_secs),
        }
    }

    /// Run one blocking RPC call on the blocking thread pool.
    ///
    /// The `RpcClient` is created and dropped on the blocking thread, since
    /// it owns its own runtime.
    async fn call<T, F>(&self, context: &'static str, f: F) -> Result<T, RpcError>
    where
        F: FnOnce(&RpcClient) -> ClientResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let rpc_url = self.rpc_url.clone();
        let task = web::block(move || {
            let client = RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed());
            f(&client)
        });

        match timeout(self.call_timeout, task).await {
            Ok(Ok(result)) => result.map_err(|e| RpcError::from_client_error(context, e)),
            Ok(Err(e)) => Err(RpcError::Request(format!(
                "{}: failed to execute blocking task: {}",
                context, e
            ))),
            Err(_) => {
                debug!("{} timed out after {:?}", context, self.call_timeout);
                Err(RpcError::Timeout(self.call_timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaClient {
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        discriminator: [u8; 8],
    ) -> Result<Vec<(Pubkey, Account)>, RpcError> {
        let program_id = *program_id;
        let accounts = self
            .call("getProgramAccounts", move |client| {
                let config = RpcProgramAccountsConfig {
                    filters: Some(vec![RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                        0,
                        discriminator.to_vec(),
                    ))]),
                    account_config: RpcAccountInfoConfig {
                        encoding: Some(UiAccountEncoding::Base64),
                        commitment: Some(CommitmentConfig::confirmed()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                client.get_program_accounts_with_config(&program_id, config)
            })
            .await?;

        debug!("Listed {} accounts of program {}", accounts.len(), program_id);
        Ok(accounts)
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, RpcError> {
        let addresses = addresses.to_vec();
        self.call("getMultipleAccounts", move |client| {
            let mut accounts = Vec::with_capacity(addresses.len());
            for chunk in addresses.chunks(MAX_MULTIPLE_ACCOUNTS) {
                accounts.extend(client.get_multiple_accounts(chunk)?);
            }
            Ok(accounts)
        })
        .await
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let address = *address;
        self.call("getBalance", move |client| client.get_balance(&address))
            .await
    }

    async fn get_token_account_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let address = *address;
        let balance = self
            .call("getTokenAccountBalance", move |client| {
                client.get_token_account_balance(&address)
            })
            .await?;

        balance
            .amount
            .parse::<u64>()
            .map_err(|e| RpcError::Request(format!("Invalid balance amount: {}", e)))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, RpcError> {
        self.call("getMinimumBalanceForRentExemption", move |client| {
            client.get_minimum_balance_for_rent_exemption(data_len)
        })
        .await
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        let blockhash = self
            .call("getLatestBlockhash", |client| client.get_latest_blockhash())
            .await?;

        debug!("Got latest blockhash: {}", blockhash);
        Ok(blockhash)
    }

    async fn simulate_compute_units(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Option<u64>, RpcError> {
        let transaction = transaction.clone();
        let response = self
            .call("simulateTransaction", move |client| {
                let config = RpcSimulateTransactionConfig {
                    sig_verify: false,
                    replace_recent_blockhash: true,
                    commitment: Some(CommitmentConfig::confirmed()),
                    ..Default::default()
                };
                client.simulate_transaction_with_config(&transaction, config)
            })
            .await?;

        if let Some(err) = &response.value.err {
            debug!("Simulation reported an error: {:?}", err);
        }
        Ok(response.value.units_consumed)
    }

    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>, RpcError> {
        let accounts = accounts.to_vec();
        let fees = self
            .call("getRecentPrioritizationFees", move |client| {
                client.get_recent_prioritization_fees(&accounts)
            })
            .await?;

        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        self.call("getSlot", |client| client.get_slot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_detection() {
        assert!(is_unavailable_message("HTTP status server error (503 Service Unavailable)"));
        assert!(is_unavailable_message("upstream said: Service Unavailable"));
        assert!(!is_unavailable_message("AccountNotFound: pubkey=abc"));
        assert!(!is_unavailable_message("429 Too Many Requests"));
    }

    #[test]
    fn test_transient_classes() {
        assert!(RpcError::Unavailable("503".into()).is_transient());
        assert!(RpcError::Timeout(10).is_transient());
        assert!(!RpcError::Request("invalid params".into()).is_transient());
    }
}
