//! Maximum withdrawal per market.
//!
//! A withdrawal first consumes the account's deposit in that market, then
//! (if free collateral remains) opens a borrow. Both legs are bounded by
//! initial-margin free collateral; the borrow leg is also bounded by the
//! market's available liquidity.
//!
//! ```text
//! free        = max(initial collateral - initial liability, 0)
//! deposit_cap = free / (price * asset_weight)            (all of it if weight = 0)
//! withdraw    = min(deposit, deposit_cap)
//! borrow      = (free - value(withdraw) * asset_weight) / (price * liability_weight)
//! limit       = withdraw + min(borrow, liquidity)        (borrow only if whole deposit is withdrawn)
//! ```

use std::collections::HashMap;

use super::valuation::valuate;
use super::{
    asset_weight, liability_weight, token_amount, MarginCategory, MarginError, WEIGHT_PRECISION,
};
use crate::protocol::accounts::{BalanceSide, RemoteRiskAccount, SpotMarket};

/// Largest amount of `market_index` the account can withdraw, in token base units.
///
/// ## Arguments
///
/// * `account` - Decoded risk account
/// * `markets` - Every market the account holds plus `market_index`
/// * `market_index` - Market to withdraw from
///
/// ## Returns
///
/// The limit, saturated to `u64`, or `MarginError::MissingMarket` when a
/// needed market was not loaded.
pub fn withdrawal_limit(
    account: &RemoteRiskAccount,
    markets: &HashMap<u16, SpotMarket>,
    market_index: u16,
) -> Result<u64, MarginError> {
    let market = markets
        .get(&market_index)
        .ok_or(MarginError::MissingMarket(market_index))?;

    let valuation = valuate(account, markets, MarginCategory::Initial)?;
    let free = valuation.free_collateral() as u128;

    let deposit = match account.position(market_index) {
        Some(p) if p.side == BalanceSide::Deposit => {
            token_amount(p.scaled_balance as u128, market, BalanceSide::Deposit)?
        }
        _ => 0,
    };

    let price = market.oracle_price.max(0) as u128;
    let precision = 10u128.pow(market.decimals as u32);
    let weight_precision = WEIGHT_PRECISION as u128;

    // value of one token's weight-unit, scaled so division stays exact enough
    let asset_w = asset_weight(market, MarginCategory::Initial).max(0) as u128;
    let (withdrawable, used_collateral) = if asset_w == 0 || price == 0 {
        (deposit, 0)
    } else {
        let cap = tokens_for_collateral(free, price, asset_w, precision, weight_precision)?;
        let withdrawable = deposit.min(cap);
        let used = collateral_for_tokens(withdrawable, price, asset_w, precision, weight_precision)?;
        (withdrawable, used)
    };

    let mut limit = withdrawable;

    if withdrawable == deposit && price > 0 {
        let remaining = free.saturating_sub(used_collateral);
        let liability_w = liability_weight(market, MarginCategory::Initial).max(0) as u128;
        if remaining > 0 && liability_w > 0 {
            let borrow = tokens_for_collateral(remaining, price, liability_w, precision, weight_precision)?;
            limit = limit.saturating_add(borrow.min(available_liquidity(market)?));
        }
    }

    Ok(u64::try_from(limit).unwrap_or(u64::MAX))
}

/// Tokens whose weighted value equals `collateral`, rounded down.
fn tokens_for_collateral(
    collateral: u128,
    price: u128,
    weight: u128,
    precision: u128,
    weight_precision: u128,
) -> Result<u128, MarginError> {
    let numerator = collateral
        .checked_mul(precision)
        .and_then(|v| v.checked_mul(weight_precision))
        .ok_or(MarginError::Overflow("withdrawal limit"))?;
    let denominator = price
        .checked_mul(weight)
        .ok_or(MarginError::Overflow("withdrawal limit"))?;
    Ok(numerator / denominator)
}

/// Weighted value of `tokens`, rounded up.
fn collateral_for_tokens(
    tokens: u128,
    price: u128,
    weight: u128,
    precision: u128,
    weight_precision: u128,
) -> Result<u128, MarginError> {
    let numerator = tokens
        .checked_mul(price)
        .and_then(|v| v.checked_mul(weight))
        .ok_or(MarginError::Overflow("withdrawal limit"))?;
    Ok(super::div_ceil(numerator, precision * weight_precision))
}

/// Deposits not already lent out, in token base units.
fn available_liquidity(market: &SpotMarket) -> Result<u128, MarginError> {
    let deposits = token_amount(market.deposit_balance, market, BalanceSide::Deposit)?;
    let borrows = token_amount(market.borrow_balance, market, BalanceSide::Borrow)?;
    Ok(deposits.saturating_sub(borrows))
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

    fn deposit(market_index: u16, scaled_balance: u64) -> SpotPosition {
        SpotPosition { market_index, scaled_balance, side: BalanceSide::Deposit }
    }

    fn borrow(market_index: u16, scaled_balance: u64) -> SpotPosition {
        SpotPosition { market_index, scaled_balance, side: BalanceSide::Borrow }
    }

    #[test]
    fn test_unencumbered_deposit_plus_borrow_capacity() {
        let mut usdc = usdc_market();
        usdc.initial_liability_weight = 12_500;
        let markets = markets_by_index(vec![usdc, sol_market(100_000_000)]);

        // 100 USDC deposited, nothing borrowed
        let account = account(vec![deposit(0, 100_000_000_000)]);

        // Withdrawing 100 USDC uses all $100 of collateral; nothing left to borrow
        assert_eq!(withdrawal_limit(&account, &markets, 0).unwrap(), 100_000_000);

        // The USDC liability weight does not enter a SOL borrow.
        // No SOL deposit: $100 free / ($100 * 1.2 SOL liability weight) = 0.8333 SOL
        assert_eq!(withdrawal_limit(&account, &markets, 1).unwrap(), 833_333_333);
    }

    #[test]
    fn test_withdrawal_bounded_by_free_collateral() {
        let markets = markets_by_index(vec![usdc_market(), sol_market(100_000_000)]);

        // 10 SOL ($800 initial collateral), 600 USDC borrowed
        let account = account(vec![deposit(1, 10_000_000_000), borrow(0, 600_000_000_000)]);

        // $200 free / ($100 * 0.8) = 2.5 SOL
        assert_eq!(withdrawal_limit(&account, &markets, 1).unwrap(), 2_500_000_000);
    }

    #[test]
    fn test_underwater_account_cannot_withdraw() {
        let markets = markets_by_index(vec![usdc_market(), sol_market(100_000_000)]);
        let account = account(vec![deposit(1, 1_000_000_000), borrow(0, 500_000_000_000)]);

        assert_eq!(withdrawal_limit(&account, &markets, 1).unwrap(), 0);
        assert_eq!(withdrawal_limit(&account, &markets, 0).unwrap(), 0);
    }

    #[test]
    fn test_borrow_leg_capped_by_liquidity() {
        let mut usdc = usdc_market();
        // 50 USDC of liquidity left
        usdc.deposit_balance = 150_000_000_000;
        usdc.borrow_balance = 100_000_000_000;
        let markets = markets_by_index(vec![usdc, sol_market(100_000_000)]);

        // 10 SOL, $800 free
        let account = account(vec![deposit(1, 10_000_000_000)]);
        assert_eq!(withdrawal_limit(&account, &markets, 0).unwrap(), 50_000_000);
    }

    #[test]
    fn test_missing_market() {
        let markets = markets_by_index(vec![usdc_market()]);
        let account = account(vec![]);
        assert_eq!(
            withdrawal_limit(&account, &markets, 1),
            Err(MarginError::MissingMarket(1))
        );
    }
}
