//! # Protocol Module
//!
//! Everything the backend knows about the two on-chain programs it reads:
//!
//! - the **vault program**, which owns one `Vault` account per user, and
//! - the **margin program**, which owns the paired risk account holding the
//!   user's spot positions, plus one `SpotMarket` account per market.
//!
//! ## Submodules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `markets` | Static table of supported markets |
//! | `pda` | Program derived address helpers |
//! | `accounts` | Decoders for vault, risk account and spot market data |
//! | `instructions` | Instruction encoders for the `build-tx` intents |

pub mod accounts;
pub mod instructions;
pub mod markets;
pub mod pda;

use std::str::FromStr;

use solana_sdk::{hash::hash, pubkey::Pubkey};

use crate::config::{AppConfig, ConfigError};

/// Program ids the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolIds {
    pub vault_program: Pubkey,
    pub margin_program: Pubkey,
}

impl ProtocolIds {
    /// Parse the program ids from configuration.
    ///
    /// ## Returns
    ///
    /// * `Ok(ProtocolIds)` - Both ids are valid public keys
    /// * `Err(ConfigError::InvalidValue)` - Either id is malformed
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            vault_program: parse_program_id("VAULT_PROGRAM_ID", &config.vault_program_id)?,
            margin_program: parse_program_id("MARGIN_PROGRAM_ID", &config.margin_program_id)?,
        })
    }
}

/// Parse the configured address lookup tables.
pub fn lookup_tables_from_config(config: &AppConfig) -> Result<Vec<Pubkey>, ConfigError> {
    config
        .lookup_table_addresses
        .iter()
        .map(|address| parse_program_id("LOOKUP_TABLE_ADDRESSES", address))
        .collect()
}

fn parse_program_id(key: &str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value).map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

/// Anchor account discriminator: first 8 bytes of `sha256("account:<Name>")`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator(&format!("account:{}", name))
}

/// Anchor instruction discriminator: first 8 bytes of `sha256("global:<name>")`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator(&format!("global:{}", name))
}

fn discriminator(preimage: &str) -> [u8; 8] {
    let digest = hash(preimage.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.to_bytes()[..8]);
    out
}
