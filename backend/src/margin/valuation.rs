//! # Account Valuation
//!
//! Collateral, liability and health of one risk account.
//!
//! ```text
//! tokens     = scaled_balance * cumulative_interest / 10^(19 - decimals)
//! value      = tokens * oracle_price / 10^decimals              (1e6 = $1)
//! weighted   = value * weight / 1e4
//!
//! health     = 100                                    if liability == 0 and collateral >= 0
//!            = 0                                      if collateral <= 0
//!            = clamp(100 - round(100 * liability / collateral), 0, 100)
//!
//! adjusted   = floor(clamp((health - 10) / 0.9, 0, 100))  with 0 -> 0, 100 -> 100
//! ```

use std::collections::HashMap;

use super::{
    asset_weight, liability_weight, token_amount, token_value, MarginCategory, MarginError,
    WEIGHT_PRECISION,
};
use crate::protocol::accounts::{BalanceSide, RemoteRiskAccount, SpotMarket};
use crate::utils::base_units_to_usd;

/// Safety margin subtracted from the raw health before it is shown.
pub const HEALTH_BUFFER_PCT: i64 = 10;

/// Weighted totals of one account, in quote base units (1e6 = $1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Valuation {
    pub total_collateral: i128,
    pub total_liability: i128,
    /// Raw health in `[0, 100]`.
    pub health_raw: u8,
}

impl Valuation {
    pub fn collateral_usd(&self) -> f64 {
        base_units_to_usd(self.total_collateral)
    }

    pub fn liability_usd(&self) -> f64 {
        base_units_to_usd(self.total_liability)
    }

    /// Weighted collateral not used by liabilities, never negative.
    pub fn free_collateral(&self) -> i128 {
        (self.total_collateral - self.total_liability).max(0)
    }

    pub fn adjusted_health(&self) -> u8 {
        adjusted_health(self.health_raw as i64)
    }
}

/// Value every position of `account` under `category` weights.
///
/// ## Arguments
///
/// * `account` - Decoded risk account
/// * `markets` - Spot markets keyed by market index; every market the
///   account holds a position in must be present
/// * `category` - Weight set to apply
///
/// ## Returns
///
/// * `Ok(Valuation)` - Totals and raw health
/// * `Err(MarginError::MissingMarket)` - A position references an unloaded market
pub fn valuate(
    account: &RemoteRiskAccount,
    markets: &HashMap<u16, SpotMarket>,
    category: MarginCategory,
) -> Result<Valuation, MarginError> {
    let mut collateral: i128 = 0;
    let mut liability: i128 = 0;

    for position in &account.positions {
        let market = markets
            .get(&position.market_index)
            .ok_or(MarginError::MissingMarket(position.market_index))?;

        let tokens = token_amount(position.scaled_balance as u128, market, position.side)?;
        let tokens = i128::try_from(tokens).map_err(|_| MarginError::Overflow("token amount"))?;
        let value = token_value(tokens, market)?;

        match position.side {
            BalanceSide::Deposit => {
                let weighted = apply_weight(value, asset_weight(market, category))?;
                collateral = collateral
                    .checked_add(weighted)
                    .ok_or(MarginError::Overflow("collateral"))?;
            }
            BalanceSide::Borrow => {
                let weighted = apply_weight(value, liability_weight(market, category))?;
                liability = liability
                    .checked_add(weighted)
                    .ok_or(MarginError::Overflow("liability"))?;
            }
        }
    }

    Ok(Valuation {
        total_collateral: collateral,
        total_liability: liability,
        health_raw: calculate_health(collateral, liability),
    })
}

fn apply_weight(value: i128, weight: i128) -> Result<i128, MarginError> {
    value
        .checked_mul(weight)
        .map(|v| v / WEIGHT_PRECISION)
        .ok_or(MarginError::Overflow("weighted value"))
}

/// Raw health from weighted totals, in `[0, 100]`.
pub fn calculate_health(collateral: i128, liability: i128) -> u8 {
    if liability == 0 && collateral >= 0 {
        return 100;
    }
    if collateral <= 0 {
        return 0;
    }

    // round(100 * liability / collateral), half up
    let numerator = liability.saturating_mul(100);
    let mut used = numerator / collateral;
    if (numerator % collateral) * 2 >= collateral {
        used += 1;
    }

    (100 - used).clamp(0, 100) as u8
}

/// Health shown to users: the raw health with the safety buffer removed
/// and rescaled to `[0, 100]`, floored.
pub fn adjusted_health(raw: i64) -> u8 {
    if raw <= 0 {
        return 0;
    }
    if raw >= 100 {
        return 100;
    }

    let scaled = (raw - HEALTH_BUFFER_PCT) * 100 / (100 - HEALTH_BUFFER_PCT);
    scaled.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::accounts::SpotPosition;
    use crate::testing::{markets_by_index, sol_market, usdc_market};
    use solana_sdk::pubkey::Pubkey;

    fn account(positions: Vec<SpotPosition>) -> RemoteRiskAccount {
        RemoteRiskAccount {
            address: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            positions,
        }
    }

    #[test]
    fn test_adjusted_health_normalization() {
        assert_eq!(adjusted_health(0), 0);
        assert_eq!(adjusted_health(100), 100);
        assert_eq!(adjusted_health(55), 50);
        assert_eq!(adjusted_health(10), 0);
        assert_eq!(adjusted_health(5), 0);
        assert_eq!(adjusted_health(-3), 0);
        assert_eq!(adjusted_health(99), 98);
    }

    #[test]
    fn test_calculate_health() {
        assert_eq!(calculate_health(1_000, 0), 100);
        assert_eq!(calculate_health(0, 0), 100);
        assert_eq!(calculate_health(0, 10), 0);
        assert_eq!(calculate_health(-5, 10), 0);
        assert_eq!(calculate_health(1_000, 250), 75);
        // 100 * 1 / 3 = 33.3 -> 33 used
        assert_eq!(calculate_health(3, 1), 67);
        // 100 * 1 / 200 = 0.5 -> rounds up to 1 used
        assert_eq!(calculate_health(200, 1), 99);
        assert_eq!(calculate_health(100, 500), 0);
    }

    #[test]
    fn test_valuate_weighted_positions() {
        let markets = markets_by_index(vec![usdc_market(), sol_market(100_000_000)]);
        let account = account(vec![
            // 10 SOL deposit
            SpotPosition { market_index: 1, scaled_balance: 10_000_000_000, side: BalanceSide::Deposit },
            // 200 USDC borrow
            SpotPosition { market_index: 0, scaled_balance: 200_000_000_000, side: BalanceSide::Borrow },
        ]);

        let initial = valuate(&account, &markets, MarginCategory::Initial).unwrap();
        // $1000 * 0.8 initial asset weight
        assert_eq!(initial.total_collateral, 800_000_000);
        assert_eq!(initial.total_liability, 200_000_000);
        assert_eq!(initial.collateral_usd(), 800.0);
        assert_eq!(initial.liability_usd(), 200.0);
        assert_eq!(initial.free_collateral(), 600_000_000);

        let maintenance = valuate(&account, &markets, MarginCategory::Maintenance).unwrap();
        // $1000 * 0.9 maintenance asset weight
        assert_eq!(maintenance.total_collateral, 900_000_000);
        // 100 - round(100 * 200 / 900) = 100 - 22
        assert_eq!(maintenance.health_raw, 78);
        assert_eq!(maintenance.adjusted_health(), 75);
    }

    #[test]
    fn test_valuate_missing_market() {
        let markets = markets_by_index(vec![usdc_market()]);
        let account = account(vec![SpotPosition {
            market_index: 1,
            scaled_balance: 1,
            side: BalanceSide::Deposit,
        }]);

        assert_eq!(
            valuate(&account, &markets, MarginCategory::Initial),
            Err(MarginError::MissingMarket(1))
        );
    }

    #[test]
    fn test_empty_account_is_fully_healthy() {
        let valuation = valuate(&account(vec![]), &HashMap::new(), MarginCategory::Maintenance).unwrap();
        assert_eq!(valuation, Valuation { total_collateral: 0, total_liability: 0, health_raw: 100 });
    }
}
