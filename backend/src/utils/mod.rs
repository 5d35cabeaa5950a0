//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service: fixed-point to USD conversion and the
//! request parameter validators shared by the handlers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use solana_sdk::pubkey::Pubkey;

use crate::errors::ServiceError;
use crate::protocol::markets::is_supported_market;

/// Base units per US dollar (USDC has 6 decimals).
pub const BASE_UNITS_PER_USD: i128 = 1_000_000;

/// Base units per cent.
const BASE_UNITS_PER_CENT: i128 = BASE_UNITS_PER_USD / 100;

/// Convert a signed base unit amount to whole cents.
///
/// Rounds half away from zero, using integer arithmetic only so that the
/// same total always produces the same cents.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(base_units_to_cents(1_005_000), 101);
/// assert_eq!(base_units_to_cents(-1_005_000), -101);
/// ```
pub fn base_units_to_cents(base_units: i128) -> i128 {
    let cents = base_units / BASE_UNITS_PER_CENT;
    let rem = base_units % BASE_UNITS_PER_CENT;

    if rem.abs() * 2 >= BASE_UNITS_PER_CENT {
        cents + base_units.signum()
    } else {
        cents
    }
}

/// Cents as a USD amount for JSON output.
pub fn cents_to_usd(cents: i128) -> f64 {
    cents as f64 / 100.0
}

/// Signed base units to USD, rounded to 2 decimal places.
pub fn base_units_to_usd(base_units: i128) -> f64 {
    cents_to_usd(base_units_to_cents(base_units))
}

/// Interpret a fixed-point integer with `decimals` implied decimals.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(fixed_to_decimal(52_500, 6), 0.0525);
/// ```
pub fn fixed_to_decimal(value: i128, decimals: u32) -> f64 {
    value as f64 / 10f64.powi(decimals as i32)
}

/// Parse the `address` query parameter.
///
/// ## Returns
///
/// * `Ok(Pubkey)` - Valid address
/// * `Err(ServiceError::InvalidInput)` - Missing or not a valid public key
pub fn parse_address(address: Option<&str>) -> Result<Pubkey, ServiceError> {
    let address = address
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("Wallet address is required".to_string()))?;

    Pubkey::from_str(address).map_err(|_| ServiceError::InvalidInput("Invalid address".to_string()))
}

/// Parse the comma separated `marketIndices` query parameter.
///
/// Entries that are not numbers are dropped. Fails when nothing numeric
/// remains or any index is not a supported market.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(parse_market_indices(Some("0,1"))?, vec![0, 1]);
/// assert!(parse_market_indices(Some("notAnIndex")).is_err());
/// ```
pub fn parse_market_indices(param: Option<&str>) -> Result<Vec<u16>, ServiceError> {
    let param = param
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("Market indices are required".to_string()))?;

    let mut numeric = Vec::new();
    for part in param.split(',') {
        if let Ok(index) = part.trim().parse::<i64>() {
            numeric.push(index);
        }
    }

    if numeric.is_empty() {
        return Err(ServiceError::InvalidInput("Invalid market indices".to_string()));
    }

    numeric
        .into_iter()
        .map(|index| {
            u16::try_from(index)
                .ok()
                .filter(|i| is_supported_market(*i))
                .ok_or_else(|| ServiceError::InvalidInput("Unsupported market index".to_string()))
        })
        .collect()
}

/// `local@host.tld` with exactly one `@` and no whitespace.
static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

/// Loose email shape check against [`EMAIL_PATTERN`].
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(email))
}

/// Timestamp format used for spreadsheet rows (`dd/mm/yyyy hh:mm:ss`).
pub fn format_sheet_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d/%m/%Y %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_base_units_to_cents_rounds_half_away_from_zero() {
        assert_eq!(base_units_to_cents(1_000_000), 100);
        assert_eq!(base_units_to_cents(1_004_999), 100);
        assert_eq!(base_units_to_cents(1_005_000), 101);
        assert_eq!(base_units_to_cents(-1_005_000), -101);
        assert_eq!(base_units_to_cents(-1_004_999), -100);
        assert_eq!(base_units_to_cents(0), 0);
    }

    #[test]
    fn test_base_units_to_usd() {
        assert_eq!(base_units_to_usd(1_234_567_890), 1234.57);
        assert_eq!(base_units_to_usd(500_000), 0.5);
    }

    #[test]
    fn test_fixed_to_decimal() {
        assert_eq!(fixed_to_decimal(52_500, 6), 0.0525);
        assert_eq!(fixed_to_decimal(0, 6), 0.0);
    }

    #[test]
    fn test_parse_address() {
        let key = Pubkey::new_unique();
        assert_eq!(parse_address(Some(&key.to_string())).unwrap(), key);

        let missing = parse_address(None).unwrap_err();
        assert_eq!(missing.to_string(), "Wallet address is required");

        let invalid = parse_address(Some("not-a-key")).unwrap_err();
        assert_eq!(invalid.to_string(), "Invalid address");
    }

    #[test]
    fn test_parse_market_indices() {
        assert_eq!(parse_market_indices(Some("0,1")).unwrap(), vec![0, 1]);
        assert_eq!(parse_market_indices(Some("1,abc,0")).unwrap(), vec![1, 0]);

        let err = parse_market_indices(None).unwrap_err();
        assert_eq!(err.to_string(), "Market indices are required");

        let err = parse_market_indices(Some("notAnIndex")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid market indices");

        let err = parse_market_indices(Some("0,7")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported market index");

        let err = parse_market_indices(Some("-1")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported market index");
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("alice example@x.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_is_valid_email_edge_shapes() {
        assert!(EMAIL_PATTERN.is_some());
        // Dots after the first one belong to the tld part
        assert!(is_valid_email("a@example.com."));
        assert!(is_valid_email("first.last@mail.example.co.uk"));
        assert!(!is_valid_email("a@@example.com"));
        assert!(!is_valid_email("a@example."));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@example.com\n"));
    }

    #[test]
    fn test_format_sheet_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(format_sheet_timestamp(ts), "07/03/2024 09:05:01");
    }
}
