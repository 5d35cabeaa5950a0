//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::services::account_service::MarketRates;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INVALID_INPUT",
///         "message": "Unsupported market index"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "NOT_A_USER").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// Rates of one market.
///
/// ```json
/// { "depositRate": 0.0213, "borrowRate": 0.0571 }
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResponse {
    pub deposit_rate: f64,
    pub borrow_rate: f64,
}

impl From<MarketRates> for RateResponse {
    fn from(rates: MarketRates) -> Self {
        Self {
            deposit_rate: rates.deposit_rate,
            borrow_rate: rates.borrow_rate,
        }
    }
}

/// Build a JSON object keyed by market index, keeping input order.
///
/// ```json
/// { "1": 2000000000, "0": -50000000 }
/// ```
pub fn keyed_by_market<T: Serialize>(entries: Vec<(u16, T)>) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(index, value)| {
            let value = serde_json::to_value(value).unwrap_or(Value::Null);
            (index.to_string(), value)
        })
        .collect()
}

/// JSON object keyed by price id, keeping input order.
pub fn keyed_by_id(entries: Vec<(String, f64)>) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(id, price)| (id, Value::from(price)))
        .collect()
}

/// Health of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHealthResponse {
    /// Adjusted health, 0 (liquidatable) to 100 (no loans).
    pub health: u8,
}

/// Plain message response (waitlist).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Built transaction.
///
/// ```json
/// { "transaction": "AQAAAAAAAAAA..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    /// Base64 encoded versioned transaction, waiting for the user's signature.
    pub transaction: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Solana RPC connection status.
    pub solana_rpc: bool,

    /// Latest slot seen by the RPC node, if reachable.
    pub slot: Option<u64>,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}
