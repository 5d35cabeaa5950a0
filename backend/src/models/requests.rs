//! # API Request Models
//!
//! Structures for incoming query strings and request bodies.
//!
//! Query fields are kept as raw strings so that a missing or malformed
//! value reaches the handler and gets the API's own error message instead
//! of the framework's.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query for the per-user and per-market endpoints.
///
/// ## Example
///
/// ```text
/// GET /user/balance?address=DcJp...pAf&marketIndices=0,1
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    /// User's wallet address (base58).
    pub address: Option<String>,

    /// Comma separated market indices.
    pub market_indices: Option<String>,
}

/// Query for `GET /data/price`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceQuery {
    /// Comma separated price-service ids, e.g. `solana,usd-coin`.
    pub ids: Option<String>,
}

/// Query for `GET /data/tvl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TvlQuery {
    /// `strict` (default) or `tolerant`.
    pub policy: Option<String>,
}

/// Query for the `build-tx` endpoints.
///
/// ## Example
///
/// ```text
/// GET /build-tx/deposit?address=DcJp...pAf&amountBaseUnits=1000000&marketIndex=0
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTxQuery {
    /// User's wallet address (fee payer).
    pub address: Option<String>,

    /// Amount in the market's smallest units.
    pub amount_base_units: Option<String>,

    /// Market to deposit into or withdraw from.
    pub market_index: Option<String>,
}

/// Waitlist signup.
///
/// ## Example JSON
///
/// ```json
/// {
///     "email": "ada@example.com",
///     "name": "Ada",
///     "country": "UK",
///     "newsletter": true
/// }
/// ```
///
/// `newsletter` is kept as a raw JSON value so that a non-boolean can be
/// told apart from a missing one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitlistRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub country: Option<String>,
    pub newsletter: Option<Value>,
}
