//! # Instruction Encoder
//!
//! Builds the instruction sequence for each `build-tx` intent. The output
//! is an [`InstructionBundle`]; fetching the blockhash, compute budget and
//! serialization happen in `services::transaction_builder`.
//!
//! ## Sequences
//!
//! ```text
//! init     : init_user
//! close    : close_user
//! upgrade  : upgrade_vault
//! deposit  : SPL  -> deposit
//!            SOL  -> create wSOL ATA, transfer, sync_native, deposit, close wSOL ATA
//! withdraw : SPL  -> create ATA (idempotent), withdraw
//!            SOL  -> create temp account, initialize_account3, withdraw, close temp
//! ```
//!
//! The temporary wrapped-SOL account of a SOL withdrawal is a fresh
//! keypair returned in `signers`; it must sign the transaction.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    program_error::ProgramError,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction, system_program, sysvar,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};

use super::markets::MarketConfig;
use super::{instruction_discriminator, ProtocolIds};

/// Size of an SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = spl_token::state::Account::LEN;

/// Spend limits written into a new vault.
pub const DEFAULT_SPEND_LIMIT_PER_TRANSACTION: u64 = 1_000_000_000;
pub const DEFAULT_SPEND_LIMIT_PER_TIMEFRAME: u64 = 1_000_000_000;
pub const DEFAULT_SPEND_LIMIT_TIMEFRAME_SECS: u64 = 86_400;
pub const DEFAULT_SPEND_LIMIT_NEXT_RESET: u64 = 0;

/// What the user wants the transaction to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxIntent {
    InitAccount,
    CloseAccount,
    UpgradeAccount,
    Deposit { amount: u64, market_index: u16 },
    Withdraw { amount: u64, market_index: u16 },
}

impl TxIntent {
    pub fn name(&self) -> &'static str {
        match self {
            TxIntent::InitAccount => "init-account",
            TxIntent::CloseAccount => "close-account",
            TxIntent::UpgradeAccount => "upgrade-account",
            TxIntent::Deposit { .. } => "deposit",
            TxIntent::Withdraw { .. } => "withdraw",
        }
    }

    /// Every intent except account creation needs an existing vault.
    pub fn requires_vault(&self) -> bool {
        !matches!(self, TxIntent::InitAccount)
    }
}

/// Instructions plus what is needed to compile and sign them.
#[derive(Debug, Default)]
pub struct InstructionBundle {
    pub instructions: Vec<Instruction>,
    /// Address lookup tables the message should be compiled against.
    pub lookup_tables: Vec<Pubkey>,
    /// Keys held by the engine that must sign (never the user's).
    pub signers: Vec<Keypair>,
}

/// Encoder for the vault program's instructions.
#[derive(Debug, Clone)]
pub struct ProtocolInstructions {
    ids: ProtocolIds,
    lookup_tables: Vec<Pubkey>,
}

impl ProtocolInstructions {
    pub fn new(ids: ProtocolIds, lookup_tables: Vec<Pubkey>) -> Self {
        Self { ids, lookup_tables }
    }

    /// Instruction bundle for `intent` on behalf of `owner`.
    ///
    /// ## Arguments
    ///
    /// * `owner` - User wallet (fee payer and signer)
    /// * `intent` - Requested operation
    /// * `market` - Market config for deposit/withdraw intents
    /// * `token_account_rent` - Rent-exempt minimum of a token account,
    ///   funded into the temporary account of a SOL withdrawal
    pub fn build(
        &self,
        owner: &Pubkey,
        intent: TxIntent,
        market: Option<&MarketConfig>,
        token_account_rent: u64,
    ) -> Result<InstructionBundle, ProgramError> {
        let mut bundle = match (intent, market) {
            (TxIntent::InitAccount, _) => InstructionBundle {
                instructions: vec![self.init_user(owner)],
                ..Default::default()
            },
            (TxIntent::CloseAccount, _) => InstructionBundle {
                instructions: vec![self.close_user(owner)],
                ..Default::default()
            },
            (TxIntent::UpgradeAccount, _) => InstructionBundle {
                instructions: vec![self.upgrade_vault(owner)],
                ..Default::default()
            },
            (TxIntent::Deposit { amount, .. }, Some(market)) => InstructionBundle {
                instructions: self.deposit_ixs(owner, amount, market)?,
                ..Default::default()
            },
            (TxIntent::Withdraw { amount, .. }, Some(market)) => {
                self.withdraw_ixs(owner, amount, market, token_account_rent)?
            }
            (_, None) => return Err(ProgramError::InvalidArgument),
        };

        bundle.lookup_tables = self.lookup_tables.clone();
        Ok(bundle)
    }

    /// Deposit sequence for `amount` of `market`.
    pub fn deposit_ixs(
        &self,
        owner: &Pubkey,
        amount: u64,
        market: &MarketConfig,
    ) -> Result<Vec<Instruction>, ProgramError> {
        let owner_spl = get_associated_token_address(owner, &market.mint);
        let deposit = self.deposit(owner, &owner_spl, amount, market);

        if !market.is_base_asset {
            return Ok(vec![deposit]);
        }

        Ok(vec![
            create_associated_token_account_idempotent(owner, owner, &market.mint, &spl_token::id()),
            system_instruction::transfer(owner, &owner_spl, amount),
            spl_token::instruction::sync_native(&spl_token::id(), &owner_spl)?,
            deposit,
            spl_token::instruction::close_account(&spl_token::id(), &owner_spl, owner, owner, &[])?,
        ])
    }

    fn withdraw_ixs(
        &self,
        owner: &Pubkey,
        amount: u64,
        market: &MarketConfig,
        token_account_rent: u64,
    ) -> Result<InstructionBundle, ProgramError> {
        if !market.is_base_asset {
            let owner_spl = get_associated_token_address(owner, &market.mint);
            return Ok(InstructionBundle {
                instructions: vec![
                    create_associated_token_account_idempotent(owner, owner, &market.mint, &spl_token::id()),
                    self.withdraw(owner, &owner_spl, amount, market),
                ],
                ..Default::default()
            });
        }

        let temp = Keypair::new();
        let temp_key = temp.pubkey();

        Ok(InstructionBundle {
            instructions: vec![
                system_instruction::create_account(
                    owner,
                    &temp_key,
                    token_account_rent,
                    TOKEN_ACCOUNT_LEN as u64,
                    &spl_token::id(),
                ),
                spl_token::instruction::initialize_account3(&spl_token::id(), &temp_key, &market.mint, owner)?,
                self.withdraw(owner, &temp_key, amount, market),
                spl_token::instruction::close_account(&spl_token::id(), &temp_key, owner, owner, &[])?,
            ],
            signers: vec![temp],
            ..Default::default()
        })
    }

    // ==========================================
    // VAULT PROGRAM INSTRUCTIONS
    // ==========================================

    fn init_user(&self, owner: &Pubkey) -> Instruction {
        let vault = self.ids.vault(owner);

        let mut data = instruction_discriminator("init_user").to_vec();
        data.extend_from_slice(&DEFAULT_SPEND_LIMIT_PER_TRANSACTION.to_le_bytes());
        data.extend_from_slice(&DEFAULT_SPEND_LIMIT_PER_TIMEFRAME.to_le_bytes());
        data.extend_from_slice(&DEFAULT_SPEND_LIMIT_TIMEFRAME_SECS.to_le_bytes());
        data.extend_from_slice(&DEFAULT_SPEND_LIMIT_NEXT_RESET.to_le_bytes());

        Instruction {
            program_id: self.ids.vault_program,
            accounts: vec![
                AccountMeta::new(vault, false),
                AccountMeta::new(*owner, true),
                AccountMeta::new(self.ids.risk_account(&vault), false),
                AccountMeta::new(self.ids.risk_stats(&vault), false),
                AccountMeta::new(self.ids.margin_state(), false),
                AccountMeta::new_readonly(self.ids.margin_program, false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        }
    }

    fn close_user(&self, owner: &Pubkey) -> Instruction {
        let vault = self.ids.vault(owner);

        Instruction {
            program_id: self.ids.vault_program,
            accounts: vec![
                AccountMeta::new(vault, false),
                AccountMeta::new(*owner, true),
                AccountMeta::new(self.ids.risk_account(&vault), false),
                AccountMeta::new(self.ids.risk_stats(&vault), false),
                AccountMeta::new(self.ids.margin_state(), false),
                AccountMeta::new_readonly(self.ids.margin_program, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: instruction_discriminator("close_user").to_vec(),
        }
    }

    fn upgrade_vault(&self, owner: &Pubkey) -> Instruction {
        Instruction {
            program_id: self.ids.vault_program,
            accounts: vec![
                AccountMeta::new(self.ids.vault(owner), false),
                AccountMeta::new(*owner, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: instruction_discriminator("upgrade_vault").to_vec(),
        }
    }

    fn deposit(&self, owner: &Pubkey, owner_spl: &Pubkey, amount: u64, market: &MarketConfig) -> Instruction {
        Instruction {
            program_id: self.ids.vault_program,
            accounts: self.transfer_accounts(owner, owner_spl, market),
            data: transfer_data("deposit", amount, market.market_index),
        }
    }

    fn withdraw(&self, owner: &Pubkey, owner_spl: &Pubkey, amount: u64, market: &MarketConfig) -> Instruction {
        let mut accounts = self.transfer_accounts(owner, owner_spl, market);
        accounts.push(AccountMeta::new_readonly(self.ids.margin_signer(), false));

        Instruction {
            program_id: self.ids.vault_program,
            accounts,
            data: transfer_data("withdraw", amount, market.market_index),
        }
    }

    /// Accounts shared by deposit and withdraw.
    fn transfer_accounts(&self, owner: &Pubkey, owner_spl: &Pubkey, market: &MarketConfig) -> Vec<AccountMeta> {
        let vault = self.ids.vault(owner);

        vec![
            AccountMeta::new(vault, false),
            AccountMeta::new(get_associated_token_address(&vault, &market.mint), false),
            AccountMeta::new(*owner, true),
            AccountMeta::new(*owner_spl, false),
            AccountMeta::new(self.ids.margin_state(), false),
            AccountMeta::new(self.ids.risk_account(&vault), false),
            AccountMeta::new(self.ids.risk_stats(&vault), false),
            AccountMeta::new(self.ids.spot_market_vault(market.market_index), false),
            AccountMeta::new(self.ids.spot_market(market.market_index), false),
            AccountMeta::new_readonly(market.mint, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(self.ids.margin_program, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ]
    }
}

/// `discriminator | amount u64 | market_index u16 | reduce_only bool`
fn transfer_data(name: &str, amount: u64, market_index: u16) -> Vec<u8> {
    let mut data = instruction_discriminator(name).to_vec();
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&market_index.to_le_bytes());
    data.push(0); // reduce_only
    data
}
