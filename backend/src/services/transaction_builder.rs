//! # Transaction Builder Service
//!
//! The TransactionBuilder turns a user intent into a ready-to-sign
//! transaction. It handles all the complexity of building properly
//! formatted versioned transactions.
//!
//! ## Responsibilities
//!
//! - Check the user has a vault (every intent except `init-account`)
//! - Get the instruction bundle from the protocol encoder
//! - Resolve the configured address lookup tables
//! - Prepend compute budget instructions sized by the fee estimator
//! - Compile a v0 message, partially sign with engine-held keys
//! - Serialize (bincode) and encode (base64)
//!
//! ## Transaction Structure
//!
//! ```text
//! VersionedTransaction (v0)
//! ├── Signatures[]           (owner slot left empty, ephemeral keys filled)
//! └── Message
//!     ├── Fee Payer          (owner)
//!     ├── Recent Blockhash
//!     ├── Lookup Tables[]
//!     └── Instructions[]
//!         ├── SetComputeUnitLimit
//!         ├── SetComputeUnitPrice
//!         └── Protocol instructions...
//! ```
//!
//! ## Unsigned vs Signed Transactions
//!
//! The user's signature slot is always left empty. The flow is:
//!
//! ```text
//! 1. Backend builds the transaction
//!              ↓
//! 2. Send to frontend (base64 encoded)
//!              ↓
//! 3. User signs with their wallet
//!              ↓
//! 4. Frontend submits signed transaction to Solana
//! ```
//!
//! This ensures the user's private key never leaves their wallet.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use tracing::{debug, info};

use super::fees::FeeEstimator;
use super::retry::RetryPolicy;
use crate::errors::ServiceError;
use crate::protocol::instructions::{ProtocolInstructions, TxIntent, TOKEN_ACCOUNT_LEN};
use crate::protocol::markets::{market_config, MarketConfig};
use crate::protocol::ProtocolIds;
use crate::solana::LedgerClient;

/// The Transaction Builder service.
///
/// ## Usage
///
/// ```rust,ignore
/// let builder = TransactionBuilder::new(ledger, ids, lookup_tables, retry);
///
/// let intent = TxIntent::Deposit { amount: 1_000_000, market_index: 0 };
/// let tx = builder.build(&owner, intent).await?;
///
/// // tx is base64-encoded, send to frontend for signing
/// ```
#[derive(Clone)]
pub struct TransactionBuilder {
    /// Ledger client.
    ledger: Arc<dyn LedgerClient>,

    /// Vault / margin program ids.
    ids: ProtocolIds,

    /// Instruction encoder.
    encoder: ProtocolInstructions,

    /// Compute budget estimation.
    fees: FeeEstimator,

    /// Retry policy for ledger reads.
    retry: RetryPolicy,
}

impl TransactionBuilder {
    /// Create a new TransactionBuilder.
    ///
    /// ## Arguments
    ///
    /// * `ledger` - Ledger client
    /// * `ids` - Program ids
    /// * `lookup_tables` - Address lookup tables to compile against
    /// * `retry` - Retry policy for ledger reads
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        ids: ProtocolIds,
        lookup_tables: Vec<Pubkey>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fees: FeeEstimator::new(ledger.clone(), retry),
            encoder: ProtocolInstructions::new(ids, lookup_tables),
            ledger,
            ids,
            retry,
        }
    }

    /// Build the transaction for `intent`.
    ///
    /// ## Arguments
    ///
    /// * `owner` - User's wallet (fee payer)
    /// * `intent` - Requested operation
    ///
    /// ## Returns
    ///
    /// * `Ok(String)` - Base64-encoded, partially signed transaction
    /// * `Err(ServiceError::InvalidInput)` - Unsupported market or zero amount
    /// * `Err(ServiceError::NotAUser)` - No vault for an intent that needs one
    /// * `Err(ServiceError::Rpc)` - Ledger read failed
    pub async fn build(&self, owner: &Pubkey, intent: TxIntent) -> Result<String, ServiceError> {
        info!("Building {} transaction for: {}", intent.name(), owner);

        let market = validate_intent(intent)?;

        if intent.requires_vault() {
            self.ensure_vault(owner).await?;
        }

        let token_account_rent = match (intent, market) {
            (TxIntent::Withdraw { .. }, Some(m)) if m.is_base_asset => {
                self.retry
                    .run(|| self.ledger.get_minimum_balance_for_rent_exemption(TOKEN_ACCOUNT_LEN))
                    .await?
            }
            _ => 0,
        };

        let bundle = self
            .encoder
            .build(owner, intent, market, token_account_rent)
            .map_err(|e| ServiceError::Transaction(e.to_string()))?;

        let (lookup_tables, blockhash) = tokio::try_join!(
            self.load_lookup_tables(&bundle.lookup_tables),
            async {
                self.retry
                    .run(|| self.ledger.get_latest_blockhash())
                    .await
                    .map_err(ServiceError::from)
            },
        )?;

        let estimate = self
            .fees
            .estimate(owner, &bundle.instructions, &lookup_tables, blockhash)
            .await?;

        let mut instructions = estimate.instructions();
        instructions.extend(bundle.instructions);

        let tx = assemble_transaction(owner, &instructions, &lookup_tables, blockhash, &bundle.signers)?;

        debug!(
            "Built {} tx ({} instructions, {} engine signers)",
            intent.name(),
            instructions.len(),
            bundle.signers.len()
        );

        Ok(tx)
    }

    async fn ensure_vault(&self, owner: &Pubkey) -> Result<(), ServiceError> {
        let vault = self.ids.vault(owner);
        let accounts = self
            .retry
            .run(|| self.ledger.get_multiple_accounts(std::slice::from_ref(&vault)))
            .await?;

        match accounts.into_iter().next().flatten() {
            Some(_) => Ok(()),
            None => Err(ServiceError::NotAUser(owner.to_string())),
        }
    }

    /// Fetch and decode the lookup tables at `addresses`.
    pub async fn load_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, ServiceError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = self
            .retry
            .run(|| self.ledger.get_multiple_accounts(addresses))
            .await?;

        addresses
            .iter()
            .zip(accounts)
            .map(|(key, account)| {
                let account = account.ok_or_else(|| {
                    ServiceError::Consistency(format!("Lookup table {} not found", key))
                })?;
                let table = AddressLookupTable::deserialize(&account.data).map_err(|e| {
                    ServiceError::Consistency(format!("Lookup table {} is invalid: {}", key, e))
                })?;
                Ok(AddressLookupTableAccount {
                    key: *key,
                    addresses: table.addresses.to_vec(),
                })
            })
            .collect()
    }
}

/// Check the market and amount of deposit/withdraw intents.
fn validate_intent(intent: TxIntent) -> Result<Option<&'static MarketConfig>, ServiceError> {
    match intent {
        TxIntent::Deposit { amount, market_index } | TxIntent::Withdraw { amount, market_index } => {
            if amount == 0 {
                return Err(ServiceError::InvalidInput(
                    "Amount must be greater than zero".to_string(),
                ));
            }
            market_config(market_index)
                .map(Some)
                .ok_or_else(|| ServiceError::InvalidInput("Unsupported market index".to_string()))
        }
        _ => Ok(None),
    }
}

// ==========================================
// ASSEMBLY
// ==========================================

/// Compile `instructions` into an unsigned v0 transaction.
pub fn compile_unsigned(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<VersionedTransaction, ServiceError> {
    let message = v0::Message::try_compile(payer, instructions, lookup_tables, blockhash)
        .map_err(|e| ServiceError::Transaction(format!("Failed to compile message: {}", e)))?;

    let required = message.header.num_required_signatures as usize;
    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message: VersionedMessage::V0(message),
    })
}

/// Compile, partially sign and encode a transaction.
///
/// Each of `signers` signs in its own slot; the payer's slot stays empty.
///
/// ## Returns
///
/// Base64 of the bincode-serialized transaction.
pub fn assemble_transaction(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    blockhash: Hash,
    signers: &[Keypair],
) -> Result<String, ServiceError> {
    let mut tx = compile_unsigned(payer, instructions, lookup_tables, blockhash)?;

    if !signers.is_empty() {
        let message_bytes = tx.message.serialize();
        let signer_keys = &tx.message.static_account_keys()[..tx.signatures.len()];

        for signer in signers {
            let index = signer_keys
                .iter()
                .position(|key| *key == signer.pubkey())
                .ok_or_else(|| {
                    ServiceError::Transaction(format!("{} is not a required signer", signer.pubkey()))
                })?;
            tx.signatures[index] = signer.sign_message(&message_bytes);
        }
    }

    let tx_bytes = bincode::serialize(&tx)
        .map_err(|e| ServiceError::Transaction(format!("Serialization error: {}", e)))?;

    Ok(BASE64.encode(tx_bytes))
}
