//! Supported spot markets.
//!
//! | Index | Symbol | Decimals | Base asset |
//! |-------|--------|----------|------------|
//! | 0 | USDC | 6 | no |
//! | 1 | SOL | 9 | yes |

use solana_sdk::{pubkey, pubkey::Pubkey};

/// Market index of the quote asset (USDC).
pub const USDC_MARKET_INDEX: u16 = 0;

/// Market index of the base network asset (SOL).
pub const SOL_MARKET_INDEX: u16 = 1;

/// Static description of one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketConfig {
    pub market_index: u16,
    pub symbol: &'static str,
    pub mint: Pubkey,
    pub decimals: u8,
    /// Asset id at the price service.
    pub price_id: &'static str,
    /// Deposits of the base asset come from the native balance.
    pub is_base_asset: bool,
}

pub static SUPPORTED_MARKETS: [MarketConfig; 2] = [
    MarketConfig {
        market_index: USDC_MARKET_INDEX,
        symbol: "USDC",
        mint: pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        decimals: 6,
        price_id: "usd-coin",
        is_base_asset: false,
    },
    MarketConfig {
        market_index: SOL_MARKET_INDEX,
        symbol: "SOL",
        mint: pubkey!("So11111111111111111111111111111111111111112"),
        decimals: 9,
        price_id: "solana",
        is_base_asset: true,
    },
];

pub fn market_config(market_index: u16) -> Option<&'static MarketConfig> {
    SUPPORTED_MARKETS.iter().find(|m| m.market_index == market_index)
}

pub fn is_supported_market(market_index: u16) -> bool {
    market_config(market_index).is_some()
}

pub fn supported_market_indices() -> Vec<u16> {
    SUPPORTED_MARKETS.iter().map(|m| m.market_index).collect()
}
