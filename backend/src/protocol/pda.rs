//! Program derived addresses.
//!
//! ```text
//! vault          = PDA(["vault", owner])                      @ vault program
//! risk account   = PDA(["user", vault, 0u16 LE])              @ margin program
//! risk stats     = PDA(["user_stats", vault])                 @ margin program
//! margin state   = PDA(["drift_state"])                       @ margin program
//! spot market    = PDA(["spot_market", index LE])             @ margin program
//! market vault   = PDA(["spot_market_vault", index LE])       @ margin program
//! ```

use solana_sdk::pubkey::Pubkey;

use super::ProtocolIds;

/// Sub-account id of the risk account paired with each vault.
pub const RISK_SUB_ACCOUNT_ID: u16 = 0;

impl ProtocolIds {
    /// Vault PDA for `owner`.
    pub fn vault(&self, owner: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"vault", owner.as_ref()], &self.vault_program).0
    }

    /// Risk account PDA paired with `vault`.
    pub fn risk_account(&self, vault: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[b"user", vault.as_ref(), &RISK_SUB_ACCOUNT_ID.to_le_bytes()],
            &self.margin_program,
        )
        .0
    }

    pub fn risk_stats(&self, vault: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"user_stats", vault.as_ref()], &self.margin_program).0
    }

    pub fn margin_state(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"drift_state"], &self.margin_program).0
    }

    pub fn spot_market(&self, market_index: u16) -> Pubkey {
        Pubkey::find_program_address(
            &[b"spot_market", &market_index.to_le_bytes()],
            &self.margin_program,
        )
        .0
    }

    pub fn spot_market_vault(&self, market_index: u16) -> Pubkey {
        Pubkey::find_program_address(
            &[b"spot_market_vault", &market_index.to_le_bytes()],
            &self.margin_program,
        )
        .0
    }

    /// Signer PDA of the margin program (owns spot market vaults).
    pub fn margin_signer(&self) -> Pubkey {
        Pubkey::find_program_address(&[b"drift_signer"], &self.margin_program).0
    }
}
