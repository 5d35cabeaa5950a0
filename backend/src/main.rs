//! # Vault Risk Backend Service
//!
//! This is the main entry point for the backend that serves risk data for
//! the lending vault protocol. It provides:
//!
//! - Per-user risk endpoints (rates, balances, health, deposit and
//!   withdraw limits)
//! - Protocol-wide data (vault owners, aggregate exposure, prices)
//! - Ready-to-sign transactions for account and transfer intents
//! - Website support (waitlist signups, published yield and figures)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                  REST API (Actix)                        │    │
//! │  │   /user/*        /data/*        /build-tx/*              │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                    SERVICE LAYER                           │  │
//! │  │  AccountService  CapacityCalculator  VaultAggregator       │  │
//! │  │  TransactionBuilder  PriceFeed  WebsiteService             │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │         │                   │                     │              │
//! │  ┌──────┴──────┐    ┌───────┴──────┐    ┌────────┴─────────┐    │
//! │  │   Solana    │    │ Price service│    │ Sheets / CMS /   │    │
//! │  │   RPC       │    │              │    │ Email            │    │
//! │  └─────────────┘    └──────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The service is stateless apart from two short-lived caches (prices
//! and market rates). Every answer is derived from the ledger at request
//! time.
//!
//! ## Quick Start
//!
//! 1. Copy `.env.example` to `.env` and configure
//! 2. Start the server: `cargo run`
//!
//! ## Environment Variables
//!
//! See `config/mod.rs` for the full list and defaults.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod cache;
mod config;
mod errors;
mod integrations;
mod margin;
mod models;
mod protocol;
mod services;
mod solana;
mod utils;

#[cfg(test)]
mod testing;

use config::{AppConfig, ConfigError};
use integrations::{BrevoMailer, GoogleSheets, Mailer, Spreadsheet, WebflowCms};
use protocol::instructions::ProtocolInstructions;
use protocol::{lookup_tables_from_config, ProtocolIds};
use services::price_feed::PriceSource;
use services::retry::RetryPolicy;
use services::{
    AccountService, CapacityCalculator, CmsTarget, CoinGeckoSource, PriceFeed, TransactionBuilder,
    VaultAggregator, WebsiteService,
};
use solana::{LedgerClient, SolanaClient};

/// Application state shared across all handlers.
///
/// ## Why Arc?
/// `Arc` (Atomic Reference Counting) allows us to share ownership
/// of these resources across multiple threads safely.
pub struct AppState {
    /// Ledger client, also used directly by the health check
    pub ledger: Arc<dyn LedgerClient>,

    /// Rates, balances, health, withdraw limits
    pub accounts: AccountService,

    /// Deposit and withdraw capacity
    pub capacity: CapacityCalculator,

    /// Vault listing and aggregate exposure
    pub aggregator: VaultAggregator,

    /// Transaction assembly for `build-tx`
    pub transactions: TransactionBuilder,

    /// Cached USD prices
    pub prices: PriceFeed,

    /// Waitlist and website data
    pub website: WebsiteService,

    /// Application configuration
    pub config: AppConfig,
}

impl AppState {
    /// Wire every service from configuration.
    ///
    /// ## Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `ledger` - Ledger client shared by all services
    /// * `price_source` - Upstream of the price cache
    ///
    /// ## Returns
    ///
    /// * `Err(ConfigError)` - A program id or lookup table address is malformed
    pub fn new(
        config: AppConfig,
        ledger: Arc<dyn LedgerClient>,
        price_source: Arc<dyn PriceSource>,
    ) -> Result<Self, ConfigError> {
        let ids = ProtocolIds::from_config(&config)?;
        let lookup_tables = lookup_tables_from_config(&config)?;
        let retry = RetryPolicy::from_config(&config);

        let accounts = AccountService::new(
            ledger.clone(),
            ids,
            retry,
            Duration::from_secs(config.rate_cache_ttl_secs),
        );

        let capacity = CapacityCalculator::new(
            ledger.clone(),
            ProtocolInstructions::new(ids, lookup_tables.clone()),
            accounts.clone(),
            retry,
        );

        let prices = PriceFeed::new(price_source, Duration::from_secs(config.price_cache_ttl_secs));

        let spreadsheet: Option<Arc<dyn Spreadsheet>> = config
            .spreadsheet
            .clone()
            .map(|c| Arc::new(GoogleSheets::new(c)) as Arc<dyn Spreadsheet>);
        let cms = config
            .cms
            .as_ref()
            .map(|c| CmsTarget::new(Arc::new(WebflowCms::new(c)), c));
        let mailer: Option<Arc<dyn Mailer>> = config
            .email_api_key
            .clone()
            .map(|key| Arc::new(BrevoMailer::new(key)) as Arc<dyn Mailer>);

        let website = WebsiteService::new(
            accounts.clone(),
            prices.clone(),
            config.yield_cut,
            spreadsheet,
            cms,
            mailer,
        );

        Ok(Self {
            aggregator: VaultAggregator::new(ledger.clone(), ids, retry),
            transactions: TransactionBuilder::new(ledger.clone(), ids, lookup_tables, retry),
            ledger,
            accounts,
            capacity,
            prices,
            website,
            config,
        })
    }
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Sets up the Solana client
/// 3. Wires the services
/// 4. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    // RUST_LOG overrides the default level, e.g. RUST_LOG=vault_risk_backend=debug
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    info!("🚀 Starting Vault Risk Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    info!("📋 Configuration loaded");
    info!("   Solana RPC: {}", config.solana_rpc_url);
    info!("   Vault program: {}", config.vault_program_id);
    info!("   Margin program: {}", config.margin_program_id);

    for (name, enabled) in [
        ("Spreadsheet", config.spreadsheet.is_some()),
        ("CMS", config.cms.is_some()),
        ("Email", config.email_api_key.is_some()),
    ] {
        if !enabled {
            warn!("⚠️  {} integration not configured, website endpoints will refuse", name);
        }
    }

    // =========================================
    // STEP 3: Initialize Solana Client
    // =========================================
    let ledger: Arc<dyn LedgerClient> = Arc::new(SolanaClient::new(&config));

    info!("⛓️  Solana client initialized");

    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let price_source = Arc::new(CoinGeckoSource::new(&config.price_api_url));
    let app_state = Arc::new(AppState::new(config, ledger, price_source).map_err(|e| {
        error!("❌ Failed to initialize services: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?);

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start HTTP Server
    // =========================================
    let server_host = app_state.config.server_host.clone();
    let server_port = app_state.config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            // Browser clients call the API directly
            .wrap(Cors::permissive())

            // Add logging middleware
            .wrap(middleware::Logger::default())

            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
