//! Utilization based interest curve.
//!
//! ```text
//! utilization = borrows / deposits                                 (1e6)
//!
//! borrow rate = optimal_rate * u / u_opt                           if u <= u_opt
//!             = optimal_rate + (max_rate - optimal_rate)
//!                 * (u - u_opt) / (1 - u_opt)                      otherwise
//!
//! deposit rate = borrow rate * u
//! ```
//!
//! All rates are annual, at 1e6 precision.

use super::{token_amount, MarginError, UTILIZATION_PRECISION};
use crate::protocol::accounts::{BalanceSide, SpotMarket};

/// Deposit and borrow rates of one market, at 1e6 precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestRates {
    pub deposit_rate: u128,
    pub borrow_rate: u128,
}

/// Borrowed share of deposits, at 1e6 precision, capped at 100%.
pub fn utilization(market: &SpotMarket) -> Result<u128, MarginError> {
    let deposits = token_amount(market.deposit_balance, market, BalanceSide::Deposit)?;
    let borrows = token_amount(market.borrow_balance, market, BalanceSide::Borrow)?;

    if deposits == 0 {
        return Ok(0);
    }

    let utilization = borrows
        .checked_mul(UTILIZATION_PRECISION)
        .ok_or(MarginError::Overflow("utilization"))?
        / deposits;

    Ok(utilization.min(UTILIZATION_PRECISION))
}

pub fn rates(market: &SpotMarket) -> Result<InterestRates, MarginError> {
    let utilization = utilization(market)?;
    let borrow_rate = borrow_rate_at(market, utilization);

    Ok(InterestRates {
        deposit_rate: deposit_rate_at(borrow_rate, utilization),
        borrow_rate,
    })
}

/// Lenders earn the borrow rate on the borrowed share of deposits.
fn deposit_rate_at(borrow_rate: u128, utilization: u128) -> u128 {
    borrow_rate * utilization / UTILIZATION_PRECISION
}

fn borrow_rate_at(market: &SpotMarket, utilization: u128) -> u128 {
    let optimal_utilization = market.optimal_utilization as u128;
    let optimal_rate = market.optimal_borrow_rate as u128;
    let max_rate = (market.max_borrow_rate as u128).max(optimal_rate);

    if utilization <= optimal_utilization {
        if optimal_utilization == 0 {
            return 0;
        }
        optimal_rate * utilization / optimal_utilization
    } else {
        let surplus = utilization - optimal_utilization;
        let span = UTILIZATION_PRECISION.saturating_sub(optimal_utilization);
        if span == 0 {
            return max_rate;
        }
        optimal_rate + (max_rate - optimal_rate) * surplus / span
    }
}
