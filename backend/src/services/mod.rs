//! # Services Module
//!
//! This module contains the business logic of the risk backend. Each
//! service handles a specific domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `AccountService` | Rates, balances, health, withdraw limits |
//! | `CapacityCalculator` | Max deposit / withdraw per market |
//! | `VaultAggregator` | Vault listing, protocol-wide exposure (TVL) |
//! | `TransactionBuilder` | Ready-to-sign transactions for user intents |
//! | `PriceFeed` | Cached USD quotes |
//! | `WebsiteService` | Waitlist, website figures |
//!
//! Shared building blocks: `retry` (backoff for ledger reads) and `fees`
//! (compute budget estimation).
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │  Account   │  │  Capacity  │  │   Vault    │  │Transaction│  │
//! │  │  Service   │◄─│ Calculator │  │ Aggregator │  │  Builder  │  │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └─────┬─────┘  │
//! │        │               └──── fees ─────┼───────────────┘        │
//! │        │                               │                        │
//! │        └──────────── retry ────────────┴──► LedgerClient        │
//! │                                                                  │
//! │  ┌────────────┐  ┌────────────┐                                 │
//! │  │  Website   │─►│ PriceFeed  │──► PriceSource (TtlCache)       │
//! │  │  Service   │  └────────────┘                                 │
//! │  └────────────┘──► Spreadsheet / Cms / Mailer                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod account_service;
pub mod capacity;
pub mod fees;
pub mod price_feed;
pub mod retry;
pub mod transaction_builder;
pub mod vault_aggregator;
pub mod website;

pub use account_service::AccountService;
pub use capacity::CapacityCalculator;
pub use price_feed::{CoinGeckoSource, PriceFeed};
pub use transaction_builder::TransactionBuilder;
pub use vault_aggregator::{AggregationPolicy, VaultAggregator};
pub use website::{CmsTarget, WebsiteService};
