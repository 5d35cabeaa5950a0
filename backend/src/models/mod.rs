//! # API Models
//!
//! This module defines the request and response structures for the REST API.
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming query strings and bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.
//! Per-market results are objects keyed by market index, in the order
//! the client asked for them.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
