//! # REST API Module
//!
//! This module defines all HTTP endpoints of the risk API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/user/rate` | Deposit and borrow rates per market |
//! | GET | `/user/balance` | Signed balance per market |
//! | GET | `/user/withdraw-limit` | Max withdrawal per market |
//! | GET | `/user/deposit-limit` | Max deposit per market |
//! | GET | `/user/health` | Account health (0-100) |
//! | GET | `/data/price` | USD prices |
//! | GET | `/data/users` | Vault owners |
//! | GET | `/data/tvl` | Collateral, loans, net exposure |
//! | POST | `/data/waitlist` | Waitlist signup |
//! | PUT | `/data/update-website-data` | Push website figures to the CMS |
//! | GET | `/build-tx/*` | Unsigned transactions |
//!
//! Every input is validated before the ledger is touched, so a bad
//! request never costs an RPC call.
//!
//! ## Request/Response Format
//!
//! All responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod routes;
pub mod handlers;

pub use routes::configure_routes;
