//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Validates input (before any network call)
//! 3. Calls the appropriate service
//! 4. Returns a formatted response
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON, with the status taken from
//! the error (400 for bad input, 5xx for upstream or server faults):
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "INVALID_INPUT",
//!         "message": "Unsupported market index"
//!     }
//! }
//! ```

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};

use crate::errors::ServiceError;
use crate::models::{
    keyed_by_id, keyed_by_market, ApiResponse, BuildTxQuery, HealthResponse, MessageResponse,
    PriceQuery, RateResponse, TransactionResponse, TvlQuery, UserHealthResponse, UserQuery,
    WaitlistRequest,
};
use crate::protocol::instructions::TxIntent;
use crate::protocol::markets::supported_market_indices;
use crate::services::price_feed::parse_price_ids;
use crate::services::website::WaitlistEntry;
use crate::services::AggregationPolicy;
use crate::utils::{parse_address, parse_market_indices};
use crate::AppState;

// ==========================================
// RESPONSE HELPERS
// ==========================================

/// Map a service error to its status and the error envelope.
fn error_response(err: &ServiceError) -> HttpResponse {
    if err.is_client_fault() {
        warn!("Request rejected: {}", err);
    } else {
        error!("Request failed: {}", err);
    }

    HttpResponse::build(err.status_code()).json(ApiResponse::<()>::error(err.code(), &err.to_string()))
}

fn respond<T: Serialize>(result: Result<T, ServiceError>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => error_response(&e),
    }
}

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Vault Risk API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Risk, capacity and exposure endpoints over the lending protocol",
        "endpoints": {
            "health": { "method": "GET", "path": "/health" },
            "user": {
                "rate": { "method": "GET", "path": "/user/rate?marketIndices=" },
                "balance": { "method": "GET", "path": "/user/balance?address=&marketIndices=" },
                "withdrawLimit": { "method": "GET", "path": "/user/withdraw-limit?address=&marketIndices=" },
                "depositLimit": { "method": "GET", "path": "/user/deposit-limit?address=&marketIndices=" },
                "health": { "method": "GET", "path": "/user/health?address=" }
            },
            "data": {
                "price": { "method": "GET", "path": "/data/price?ids=" },
                "users": { "method": "GET", "path": "/data/users" },
                "tvl": { "method": "GET", "path": "/data/tvl" },
                "waitlist": { "method": "POST", "path": "/data/waitlist" },
                "updateWebsiteData": { "method": "PUT", "path": "/data/update-website-data" }
            },
            "buildTx": {
                "initAccount": { "method": "GET", "path": "/build-tx/init-account?address=" },
                "closeAccount": { "method": "GET", "path": "/build-tx/close-account?address=" },
                "upgradeAccount": { "method": "GET", "path": "/build-tx/upgrade-account?address=" },
                "deposit": { "method": "GET", "path": "/build-tx/deposit?address=&amountBaseUnits=&marketIndex=" },
                "withdraw": { "method": "GET", "path": "/build-tx/withdraw?address=&amountBaseUnits=&marketIndex=" }
            }
        }
    });

    HttpResponse::Ok()
        .content_type("application/json")
        .json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "solanaRpc": true,
///         "slot": 312345678,
///         "version": "0.1.0",
///         "timestamp": "2025-12-08T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let slot = match state.ledger.get_slot().await {
        Ok(slot) => Some(slot),
        Err(e) => {
            warn!("RPC health check failed: {}", e);
            None
        }
    };
    let healthy = slot.is_some();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        solana_rpc: healthy,
        slot,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ==========================================
// USER ENDPOINTS
// ==========================================

/// Deposit and borrow rates per market.
///
/// ## Endpoint
///
/// `GET /user/rate?marketIndices=0,1`
///
/// ## Response
///
/// ```json
/// { "success": true, "data": { "0": { "depositRate": 0.02, "borrowRate": 0.05 } } }
/// ```
pub async fn get_rate(state: web::Data<Arc<AppState>>, query: web::Query<UserQuery>) -> HttpResponse {
    let result: Result<_, ServiceError> = async {
        let indices = parse_market_indices(query.market_indices.as_deref())?;
        let rates = state.accounts.get_rates(&indices).await?;
        Ok(keyed_by_market(
            rates.into_iter().map(|(i, r)| (i, RateResponse::from(r))).collect(),
        ))
    }
    .await;

    respond(result)
}

/// Signed token balance per market (negative for loans).
///
/// ## Endpoint
///
/// `GET /user/balance?address=...&marketIndices=0,1`
pub async fn get_balance(state: web::Data<Arc<AppState>>, query: web::Query<UserQuery>) -> HttpResponse {
    let result: Result<_, ServiceError> = async {
        let (address, indices) = parse_user_query(&query)?;
        info!("Balance request for {} markets {:?}", address, indices);
        let balances = state.accounts.get_balances(&address, &indices).await?;
        Ok(keyed_by_market(balances))
    }
    .await;

    respond(result)
}

/// Maximum withdrawal per market, in base units.
///
/// ## Endpoint
///
/// `GET /user/withdraw-limit?address=...&marketIndices=0,1`
pub async fn get_withdraw_limit(
    state: web::Data<Arc<AppState>>,
    query: web::Query<UserQuery>,
) -> HttpResponse {
    let result: Result<_, ServiceError> = async {
        let (address, indices) = parse_user_query(&query)?;
        let limits = state.capacity.max_withdraw(&address, &indices).await?;
        Ok(keyed_by_market(limits))
    }
    .await;

    respond(result)
}

/// Maximum deposit per market, in base units.
///
/// Every supported market is returned when `marketIndices` is omitted.
///
/// ## Endpoint
///
/// `GET /user/deposit-limit?address=...[&marketIndices=0,1]`
pub async fn get_deposit_limit(
    state: web::Data<Arc<AppState>>,
    query: web::Query<UserQuery>,
) -> HttpResponse {
    let result: Result<_, ServiceError> = async {
        let indices = match query.market_indices.as_deref() {
            Some(param) => parse_market_indices(Some(param))?,
            None => supported_market_indices(),
        };
        let address = parse_address(query.address.as_deref())?;
        let limits = state.capacity.max_deposits(&address, &indices).await?;
        Ok(keyed_by_market(limits))
    }
    .await;

    respond(result)
}

/// Adjusted health of a user, 0 to 100.
///
/// ## Endpoint
///
/// `GET /user/health?address=...`
pub async fn get_health(state: web::Data<Arc<AppState>>, query: web::Query<UserQuery>) -> HttpResponse {
    let result: Result<_, ServiceError> = async {
        let address = parse_address(query.address.as_deref())?;
        let health = state.accounts.get_health(&address).await?;
        Ok(UserHealthResponse { health })
    }
    .await;

    respond(result)
}

fn parse_user_query(query: &UserQuery) -> Result<(Pubkey, Vec<u16>), ServiceError> {
    let indices = parse_market_indices(query.market_indices.as_deref())?;
    let address = parse_address(query.address.as_deref())?;
    Ok((address, indices))
}

// ==========================================
// DATA ENDPOINTS
// ==========================================

/// USD prices by price-service id.
///
/// ## Endpoint
///
/// `GET /data/price?ids=solana,usd-coin`
///
/// ## Response
///
/// ```json
/// { "success": true, "data": { "solana": 151.2, "usd-coin": 1.0 } }
/// ```
pub async fn get_price(state: web::Data<Arc<AppState>>, query: web::Query<PriceQuery>) -> HttpResponse {
    let ids = parse_price_ids(query.ids.as_deref());
    respond(state.prices.get_prices(&ids).await.map(keyed_by_id))
}

/// Owners of every vault.
///
/// ## Endpoint
///
/// `GET /data/users`
pub async fn get_users(state: web::Data<Arc<AppState>>) -> HttpResponse {
    respond(state.aggregator.list_users().await)
}

/// Protocol-wide collateral, loans and net exposure in USD.
///
/// ## Endpoint
///
/// `GET /data/tvl[?policy=tolerant]`
///
/// ## Response
///
/// ```json
/// { "success": true, "data": { "collateral": 1520344.12, "loans": 402113.5, "net": 1118230.62 } }
/// ```
pub async fn get_tvl(state: web::Data<Arc<AppState>>, query: web::Query<TvlQuery>) -> HttpResponse {
    info!("TVL request");

    let result: Result<_, ServiceError> = async {
        let policy = match query.policy.as_deref() {
            Some(policy) => policy.parse::<AggregationPolicy>()?,
            None => AggregationPolicy::default(),
        };
        state.aggregator.compute_aggregate_exposure(policy).await
    }
    .await;

    respond(result)
}

/// Add a signup to the waitlist.
///
/// ## Endpoint
///
/// `POST /data/waitlist`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/data/waitlist \
///   -H "Content-Type: application/json" \
///   -d '{"email": "ada@example.com", "name": "Ada", "country": "UK", "newsletter": true}'
/// ```
pub async fn add_waitlist(
    state: web::Data<Arc<AppState>>,
    body: web::Json<WaitlistRequest>,
) -> HttpResponse {
    let body = body.into_inner();

    let result: Result<_, ServiceError> = async {
        let entry = WaitlistEntry::validate(body.email, body.name, body.country, body.newsletter)?;
        let outcome = state.website.add_to_waitlist(entry).await?;
        Ok(MessageResponse {
            message: outcome.message().to_string(),
        })
    }
    .await;

    respond(result)
}

/// Recompute the website figures and push them to the CMS.
///
/// ## Endpoint
///
/// `PUT /data/update-website-data`
///
/// ## Response
///
/// ```json
/// { "success": true, "data": { "yield": 2.63, "valueLost": 82 } }
/// ```
pub async fn update_website_data(state: web::Data<Arc<AppState>>) -> HttpResponse {
    respond(state.website.update_website_data().await)
}

// ==========================================
// BUILD-TX ENDPOINTS
// ==========================================

/// Transaction creating the vault and its risk account.
///
/// ## Endpoint
///
/// `GET /build-tx/init-account?address=...`
pub async fn build_init_account(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BuildTxQuery>,
) -> HttpResponse {
    build_tx(&state, &query, |_| Ok(TxIntent::InitAccount)).await
}

/// Transaction closing the vault.
///
/// ## Endpoint
///
/// `GET /build-tx/close-account?address=...`
pub async fn build_close_account(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BuildTxQuery>,
) -> HttpResponse {
    build_tx(&state, &query, |_| Ok(TxIntent::CloseAccount)).await
}

/// Transaction migrating the vault to the current layout.
///
/// ## Endpoint
///
/// `GET /build-tx/upgrade-account?address=...`
pub async fn build_upgrade_account(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BuildTxQuery>,
) -> HttpResponse {
    build_tx(&state, &query, |_| Ok(TxIntent::UpgradeAccount)).await
}

/// Deposit transaction.
///
/// ## Endpoint
///
/// `GET /build-tx/deposit?address=...&amountBaseUnits=1000000&marketIndex=0`
///
/// ## Response
///
/// ```json
/// { "success": true, "data": { "transaction": "AQAAAAAA..." } }
/// ```
pub async fn build_deposit(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BuildTxQuery>,
) -> HttpResponse {
    build_tx(&state, &query, |q| {
        let (amount, market_index) = parse_transfer(q)?;
        Ok(TxIntent::Deposit { amount, market_index })
    })
    .await
}

/// Withdraw transaction.
///
/// ## Endpoint
///
/// `GET /build-tx/withdraw?address=...&amountBaseUnits=1000000&marketIndex=1`
pub async fn build_withdraw(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BuildTxQuery>,
) -> HttpResponse {
    build_tx(&state, &query, |q| {
        let (amount, market_index) = parse_transfer(q)?;
        Ok(TxIntent::Withdraw { amount, market_index })
    })
    .await
}

async fn build_tx<F>(state: &AppState, query: &BuildTxQuery, intent: F) -> HttpResponse
where
    F: FnOnce(&BuildTxQuery) -> Result<TxIntent, ServiceError>,
{
    let result: Result<_, ServiceError> = async {
        let address = parse_address(query.address.as_deref())?;
        let intent = intent(query)?;
        let transaction = state.transactions.build(&address, intent).await?;
        Ok(TransactionResponse { transaction })
    }
    .await;

    respond(result)
}

fn parse_transfer(query: &BuildTxQuery) -> Result<(u64, u16), ServiceError> {
    let amount = query
        .amount_base_units
        .as_deref()
        .ok_or_else(|| ServiceError::InvalidInput("Amount is required".to_string()))?
        .trim()
        .parse::<u64>()
        .map_err(|_| ServiceError::InvalidInput("Invalid amount".to_string()))?;

    let market_index = query
        .market_index
        .as_deref()
        .ok_or_else(|| ServiceError::InvalidInput("Market index is required".to_string()))?
        .trim()
        .parse::<u16>()
        .map_err(|_| ServiceError::InvalidInput("Unsupported market index".to_string()))?;

    Ok((amount, market_index))
}
