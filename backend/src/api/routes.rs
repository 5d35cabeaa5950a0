//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                      GET - Health check
/// ├── /user
/// │   ├── /rate                    GET - Deposit / borrow rates
/// │   ├── /balance                 GET - Signed balances
/// │   ├── /withdraw-limit          GET - Max withdrawal
/// │   ├── /deposit-limit           GET - Max deposit
/// │   └── /health                  GET - Account health
/// ├── /data
/// │   ├── /price                   GET - USD prices
/// │   ├── /users                   GET - Vault owners
/// │   ├── /tvl                     GET - Protocol exposure
/// │   ├── /waitlist                POST - Waitlist signup
/// │   └── /update-website-data     PUT - Refresh website figures
/// └── /build-tx
///     ├── /init-account            GET
///     ├── /close-account           GET
///     ├── /upgrade-account         GET
///     ├── /deposit                 GET
///     └── /withdraw                GET
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Per-user risk endpoints
        .service(
            web::scope("/user")
                .route("/rate", web::get().to(handlers::get_rate))
                .route("/balance", web::get().to(handlers::get_balance))
                .route("/withdraw-limit", web::get().to(handlers::get_withdraw_limit))
                .route("/deposit-limit", web::get().to(handlers::get_deposit_limit))
                .route("/health", web::get().to(handlers::get_health)),
        )

        // Protocol-wide data
        .service(
            web::scope("/data")
                .route("/price", web::get().to(handlers::get_price))
                .route("/users", web::get().to(handlers::get_users))
                .route("/tvl", web::get().to(handlers::get_tvl))
                .route("/waitlist", web::post().to(handlers::add_waitlist))

                // Scheduled job, called by the website cron
                .route("/update-website-data", web::put().to(handlers::update_website_data)),
        )

        // Unsigned transactions for the user's wallet
        .service(
            web::scope("/build-tx")
                .route("/init-account", web::get().to(handlers::build_init_account))
                .route("/close-account", web::get().to(handlers::build_close_account))
                .route("/upgrade-account", web::get().to(handlers::build_upgrade_account))
                .route("/deposit", web::get().to(handlers::build_deposit))
                .route("/withdraw", web::get().to(handlers::build_withdraw)),
        );
}
