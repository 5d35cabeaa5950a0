//! # Margin Module
//!
//! Fixed-point margin math over decoded risk accounts and spot markets.
//! Everything here is pure: no I/O, no floats, no clocks.
//!
//! ## Precisions
//!
//! | Quantity | Precision |
//! |----------|-----------|
//! | Oracle price, quote value | 1e6 |
//! | Asset / liability weight | 1e4 |
//! | Cumulative interest | 1e10 |
//! | Scaled balance | 1e9 |
//! | Interest rate, utilization | 1e6 |
//!
//! ## Submodules
//!
//! - `valuation` - collateral, liability and health of one account
//! - `rates` - utilization based deposit/borrow rate curve
//! - `limits` - maximum withdrawal per market

pub mod limits;
pub mod rates;
pub mod valuation;

use crate::protocol::accounts::{BalanceSide, SpotMarket, SpotPosition};

pub const WEIGHT_PRECISION: i128 = 10_000;
pub const RATE_PRECISION: u128 = 1_000_000;
pub const UTILIZATION_PRECISION: u128 = 1_000_000;

/// scaled balance (1e9) * interest (1e10) carries 19 implied decimals.
const SCALED_INTEREST_DECIMALS: u32 = 19;

/// Which weight set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginCategory {
    /// Opening risk: valuation and withdrawal limits.
    Initial,
    /// Keeping risk: health.
    Maintenance,
}

/// Errors from the margin math.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MarginError {
    #[error("spot market {0} was not loaded")]
    MissingMarket(u16),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

/// Convert a scaled balance to token base units.
///
/// Borrows round up so that liabilities are never understated.
pub fn token_amount(
    scaled_balance: u128,
    market: &SpotMarket,
    side: BalanceSide,
) -> Result<u128, MarginError> {
    let interest = match side {
        BalanceSide::Deposit => market.cumulative_deposit_interest,
        BalanceSide::Borrow => market.cumulative_borrow_interest,
    };
    let divisor = 10u128.pow(SCALED_INTEREST_DECIMALS.saturating_sub(market.decimals as u32));

    let product = scaled_balance
        .checked_mul(interest)
        .ok_or(MarginError::Overflow("token amount"))?;

    Ok(match side {
        BalanceSide::Deposit => product / divisor,
        BalanceSide::Borrow => div_ceil(product, divisor),
    })
}

/// Signed token balance of a position: deposits positive, borrows negative.
pub fn signed_token_amount(position: &SpotPosition, market: &SpotMarket) -> Result<i128, MarginError> {
    let amount = token_amount(position.scaled_balance as u128, market, position.side)?;
    let amount = i128::try_from(amount).map_err(|_| MarginError::Overflow("token amount"))?;

    Ok(match position.side {
        BalanceSide::Deposit => amount,
        BalanceSide::Borrow => -amount,
    })
}

/// Quote value (1e6) of `tokens` base units at the market's oracle price.
pub fn token_value(tokens: i128, market: &SpotMarket) -> Result<i128, MarginError> {
    let precision = 10i128.pow(market.decimals as u32);
    tokens
        .checked_mul(market.oracle_price as i128)
        .map(|v| v / precision)
        .ok_or(MarginError::Overflow("token value"))
}

/// Asset weight (1e4) of `market` for `category`.
pub fn asset_weight(market: &SpotMarket, category: MarginCategory) -> i128 {
    match category {
        MarginCategory::Initial => market.initial_asset_weight as i128,
        MarginCategory::Maintenance => market.maintenance_asset_weight as i128,
    }
}

/// Liability weight (1e4) of `market` for `category`.
pub fn liability_weight(market: &SpotMarket, category: MarginCategory) -> i128 {
    match category {
        MarginCategory::Initial => market.initial_liability_weight as i128,
        MarginCategory::Maintenance => market.maintenance_liability_weight as i128,
    }
}

pub(crate) fn div_ceil(numerator: u128, denominator: u128) -> u128 {
    if denominator == 0 {
        return 0;
    }
    numerator / denominator + u128::from(numerator % denominator != 0)
}
