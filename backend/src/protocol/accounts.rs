//! # Account Decoders
//!
//! Decodes the raw account data returned by the ledger into typed
//! snapshots. All decoders check the 8-byte Anchor discriminator and the
//! minimum length before reading any field.
//!
//! ## Vault (vault program)
//!
//! ```text
//! 0..8    discriminator  sha256("account:Vault")[..8]
//! 8..40   owner          Pubkey
//! ```
//!
//! ## Risk account (margin program, "User")
//!
//! ```text
//! 0..8      discriminator
//! 8..40     authority      Pubkey (the vault)
//! 40..104   delegate, name
//! 104..424  spot positions [SpotPosition; 8], 40 bytes each
//!
//! SpotPosition
//! +0   scaled_balance  u64
//! +32  market_index    u16
//! +34  balance_type    u8   (0 = deposit, 1 = borrow)
//! ```
//!
//! ## Spot market (margin program, "SpotMarket")
//!
//! ```text
//! 8    pubkey                         Pubkey
//! 40   oracle                         Pubkey
//! 72   mint                           Pubkey
//! 104  oracle_price                   i64   (1e6)
//! 112  deposit_balance                u128  (scaled, 1e9)
//! 128  borrow_balance                 u128  (scaled, 1e9)
//! 144  cumulative_deposit_interest    u128  (1e10)
//! 160  cumulative_borrow_interest     u128  (1e10)
//! 176  optimal_utilization            u32   (1e6)
//! 180  optimal_borrow_rate            u32   (1e6)
//! 184  max_borrow_rate                u32   (1e6)
//! 188  initial_asset_weight           u32   (1e4)
//! 192  maintenance_asset_weight       u32   (1e4)
//! 196  initial_liability_weight       u32   (1e4)
//! 200  maintenance_liability_weight   u32   (1e4)
//! 204  market_index                   u16
//! 206  decimals                       u8
//! ```

use solana_sdk::pubkey::Pubkey;

use super::account_discriminator;

pub const VAULT_ACCOUNT: &str = "Vault";
pub const RISK_ACCOUNT: &str = "User";
pub const SPOT_MARKET_ACCOUNT: &str = "SpotMarket";

pub const VAULT_OWNER_OFFSET: usize = 8;
pub const VAULT_MIN_LEN: usize = 40;

pub const RISK_AUTHORITY_OFFSET: usize = 8;
pub const SPOT_POSITIONS_OFFSET: usize = 104;
pub const SPOT_POSITION_LEN: usize = 40;
pub const MAX_SPOT_POSITIONS: usize = 8;
pub const RISK_ACCOUNT_MIN_LEN: usize = SPOT_POSITIONS_OFFSET + SPOT_POSITION_LEN * MAX_SPOT_POSITIONS;

/// Field offsets of the spot market layout.
pub mod spot_market_layout {
    pub const PUBKEY: usize = 8;
    pub const ORACLE: usize = 40;
    pub const MINT: usize = 72;
    pub const ORACLE_PRICE: usize = 104;
    pub const DEPOSIT_BALANCE: usize = 112;
    pub const BORROW_BALANCE: usize = 128;
    pub const CUMULATIVE_DEPOSIT_INTEREST: usize = 144;
    pub const CUMULATIVE_BORROW_INTEREST: usize = 160;
    pub const OPTIMAL_UTILIZATION: usize = 176;
    pub const OPTIMAL_BORROW_RATE: usize = 180;
    pub const MAX_BORROW_RATE: usize = 184;
    pub const INITIAL_ASSET_WEIGHT: usize = 188;
    pub const MAINTENANCE_ASSET_WEIGHT: usize = 192;
    pub const INITIAL_LIABILITY_WEIGHT: usize = 196;
    pub const MAINTENANCE_LIABILITY_WEIGHT: usize = 200;
    pub const MARKET_INDEX: usize = 204;
    pub const DECIMALS: usize = 206;
    pub const MIN_LEN: usize = 207;
}

/// Errors raised while decoding account data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountDecodeError {
    #[error("{account} account {address} has the wrong discriminator")]
    WrongDiscriminator { account: &'static str, address: Pubkey },

    #[error("{account} account {address} is {actual} bytes, expected at least {expected}")]
    TooShort {
        account: &'static str,
        address: Pubkey,
        expected: usize,
        actual: usize,
    },

    #[error("{account} account {address}: {reason}")]
    InvalidField {
        account: &'static str,
        address: Pubkey,
        reason: String,
    },
}

/// A user's vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultAccount {
    pub owner: Pubkey,
    pub vault_address: Pubkey,
}

/// Which side of the book a spot position is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceSide {
    Deposit,
    Borrow,
}

/// One non-empty spot position of a risk account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotPosition {
    pub market_index: u16,
    /// Balance in interest-scaled units (1e9 precision).
    pub scaled_balance: u64,
    pub side: BalanceSide,
}

/// Snapshot of the margin program account paired with a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRiskAccount {
    pub address: Pubkey,
    pub authority: Pubkey,
    pub positions: Vec<SpotPosition>,
}

impl RemoteRiskAccount {
    pub fn position(&self, market_index: u16) -> Option<&SpotPosition> {
        self.positions.iter().find(|p| p.market_index == market_index)
    }
}

/// Margin data of one spot market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotMarket {
    pub pubkey: Pubkey,
    pub oracle: Pubkey,
    pub mint: Pubkey,
    pub oracle_price: i64,
    pub deposit_balance: u128,
    pub borrow_balance: u128,
    pub cumulative_deposit_interest: u128,
    pub cumulative_borrow_interest: u128,
    pub optimal_utilization: u32,
    pub optimal_borrow_rate: u32,
    pub max_borrow_rate: u32,
    pub initial_asset_weight: u32,
    pub maintenance_asset_weight: u32,
    pub initial_liability_weight: u32,
    pub maintenance_liability_weight: u32,
    pub market_index: u16,
    pub decimals: u8,
}

// ==========================================
// DECODERS
// ==========================================

impl VaultAccount {
    pub fn decode(address: Pubkey, data: &[u8]) -> Result<Self, AccountDecodeError> {
        check_header(VAULT_ACCOUNT, address, data, VAULT_MIN_LEN)?;
        Ok(Self {
            owner: read_pubkey(data, VAULT_OWNER_OFFSET),
            vault_address: address,
        })
    }
}

impl RemoteRiskAccount {
    pub fn decode(address: Pubkey, data: &[u8]) -> Result<Self, AccountDecodeError> {
        check_header(RISK_ACCOUNT, address, data, RISK_ACCOUNT_MIN_LEN)?;

        let mut positions = Vec::new();
        for slot in 0..MAX_SPOT_POSITIONS {
            let base = SPOT_POSITIONS_OFFSET + slot * SPOT_POSITION_LEN;
            let scaled_balance = read_u64(data, base);
            if scaled_balance == 0 {
                continue;
            }

            let side = match data[base + 34] {
                0 => BalanceSide::Deposit,
                1 => BalanceSide::Borrow,
                other => {
                    return Err(AccountDecodeError::InvalidField {
                        account: RISK_ACCOUNT,
                        address,
                        reason: format!("balance type {} in slot {}", other, slot),
                    })
                }
            };

            positions.push(SpotPosition {
                market_index: read_u16(data, base + 32),
                scaled_balance,
                side,
            });
        }

        Ok(Self {
            address,
            authority: read_pubkey(data, RISK_AUTHORITY_OFFSET),
            positions,
        })
    }
}

impl SpotMarket {
    pub fn decode(address: Pubkey, data: &[u8]) -> Result<Self, AccountDecodeError> {
        use spot_market_layout as L;

        check_header(SPOT_MARKET_ACCOUNT, address, data, L::MIN_LEN)?;

        let market = Self {
            pubkey: read_pubkey(data, L::PUBKEY),
            oracle: read_pubkey(data, L::ORACLE),
            mint: read_pubkey(data, L::MINT),
            oracle_price: read_u64(data, L::ORACLE_PRICE) as i64,
            deposit_balance: read_u128(data, L::DEPOSIT_BALANCE),
            borrow_balance: read_u128(data, L::BORROW_BALANCE),
            cumulative_deposit_interest: read_u128(data, L::CUMULATIVE_DEPOSIT_INTEREST),
            cumulative_borrow_interest: read_u128(data, L::CUMULATIVE_BORROW_INTEREST),
            optimal_utilization: read_u32(data, L::OPTIMAL_UTILIZATION),
            optimal_borrow_rate: read_u32(data, L::OPTIMAL_BORROW_RATE),
            max_borrow_rate: read_u32(data, L::MAX_BORROW_RATE),
            initial_asset_weight: read_u32(data, L::INITIAL_ASSET_WEIGHT),
            maintenance_asset_weight: read_u32(data, L::MAINTENANCE_ASSET_WEIGHT),
            initial_liability_weight: read_u32(data, L::INITIAL_LIABILITY_WEIGHT),
            maintenance_liability_weight: read_u32(data, L::MAINTENANCE_LIABILITY_WEIGHT),
            market_index: read_u16(data, L::MARKET_INDEX),
            decimals: data[L::DECIMALS],
        };

        if market.decimals > 19 {
            return Err(AccountDecodeError::InvalidField {
                account: SPOT_MARKET_ACCOUNT,
                address,
                reason: format!("decimals {} out of range", market.decimals),
            });
        }

        Ok(market)
    }
}

// ==========================================
// HELPERS
// ==========================================

fn check_header(
    account: &'static str,
    address: Pubkey,
    data: &[u8],
    min_len: usize,
) -> Result<(), AccountDecodeError> {
    if data.len() < min_len {
        return Err(AccountDecodeError::TooShort {
            account,
            address,
            expected: min_len,
            actual: data.len(),
        });
    }
    if data[..8] != account_discriminator(account) {
        return Err(AccountDecodeError::WrongDiscriminator { account, address });
    }
    Ok(())
}

// Callers check the length first, so these slices are always in range.

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset..offset + 32]);
    Pubkey::new_from_array(bytes)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&data[offset..offset + 2]);
    u16::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u128(data: &[u8], offset: usize) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[offset..offset + 16]);
    u128::from_le_bytes(bytes)
}
