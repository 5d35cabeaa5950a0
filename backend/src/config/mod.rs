//! # Configuration Module
//!
//! This module handles loading and validating configuration from
//! environment variables. All settings are centralized here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! dotenvy::dotenv().ok();
//! let config = AppConfig::from_env()?;
//! println!("RPC URL: {}", config.solana_rpc_url);
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SOLANA_RPC_URL` | Solana RPC endpoint | `https://api.mainnet-beta.solana.com` |
//! | `VAULT_PROGRAM_ID` | Lending protocol (vault) program | `6JjHXLhe...` |
//! | `MARGIN_PROGRAM_ID` | Paired margin program | `dRiftyHA...` |
//! | `SERVER_HOST` | HTTP server host | `127.0.0.1` |
//! | `SERVER_PORT` | HTTP server port | `8080` |
//! | `PRICE_API_URL` | Price service base URL | `https://api.coingecko.com/api/v3` |
//! | `PRICE_CACHE_TTL_SECS` | Price quote freshness window | `60` |
//! | `RATE_CACHE_TTL_SECS` | Interest rate freshness window | `60` |
//! | `RPC_RETRY_ATTEMPTS` | Attempts for transient RPC failures | `3` |
//! | `RPC_RETRY_DELAY_MS` | Initial backoff delay | `1000` |
//! | `RPC_TIMEOUT_SECS` | Timeout for a single RPC call | `10` |
//! | `LOOKUP_TABLE_ADDRESSES` | Comma separated address lookup tables | empty |
//! | `YIELD_CUT` | Share of the deposit yield kept by the protocol | `0.5` |
//!
//! Spreadsheet, CMS and email credentials are optional. The endpoints that
//! need them answer with `NOT_CONFIGURED` when they are missing.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Default lending protocol program.
pub const DEFAULT_VAULT_PROGRAM_ID: &str = "6JjHXLheGSNvvexgzMthEcgjkcirDrGduc3HAKB2P1v2";

/// Default margin program the vaults are paired with.
pub const DEFAULT_MARGIN_PROGRAM_ID: &str = "dRiftyHA39MWEi3m9aunc5MzRF1JYuBsbn6VPcn33UH";

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Failed to parse a value
    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

/// Credentials for the spreadsheet that backs the waitlist.
#[derive(Debug, Clone)]
pub struct SpreadsheetConfig {
    /// Service account email used as the JWT issuer.
    pub client_email: String,

    /// PEM encoded RSA private key of the service account.
    ///
    /// Literal `\n` sequences are accepted and converted to newlines.
    pub private_key: String,

    /// Target spreadsheet.
    pub spreadsheet_id: String,
}

/// CMS access and the items the website data job updates.
#[derive(Debug, Clone)]
pub struct CmsConfig {
    /// API token.
    pub access_token: String,

    /// Collection holding the counters.
    pub collection_id: String,

    /// Item showing the waitlist size.
    pub waitlist_item_id: String,

    /// Item showing the deposit yield.
    pub yield_item_id: String,

    /// Item showing the value lost to custodians.
    pub value_lost_item_id: String,
}

/// Application configuration loaded from environment variables.
///
/// ## Example
///
/// ```rust,ignore
/// let config = AppConfig::from_env()?;
/// println!("Vault program: {}", config.vault_program_id);
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    // ==========================================
    // SOLANA SETTINGS
    // ==========================================

    /// Solana RPC endpoint URL.
    ///
    /// Common values:
    /// - Mainnet: `https://api.mainnet-beta.solana.com`
    /// - Devnet: `https://api.devnet.solana.com`
    /// - Local: `http://localhost:8899`
    pub solana_rpc_url: String,

    /// The lending protocol program that owns the vault accounts.
    pub vault_program_id: String,

    /// The margin program that owns the paired risk accounts.
    pub margin_program_id: String,

    /// Address lookup tables attached to every assembled transaction.
    pub lookup_table_addresses: Vec<String>,

    // ==========================================
    // RPC RESILIENCE
    // ==========================================

    /// Total attempts for an RPC read that fails with "service unavailable".
    pub rpc_retry_attempts: u32,

    /// Delay before the first retry, doubled on every further attempt.
    pub rpc_retry_delay_ms: u64,

    /// Upper bound for a single RPC call.
    pub rpc_timeout_secs: u64,

    // ==========================================
    // SERVER SETTINGS
    // ==========================================

    /// HTTP server host address.
    ///
    /// Use `127.0.0.1` for localhost only, `0.0.0.0` to accept
    /// connections from any interface.
    pub server_host: String,

    /// HTTP server port number.
    pub server_port: u16,

    // ==========================================
    // MARKET DATA
    // ==========================================

    /// Base URL of the price service.
    pub price_api_url: String,

    /// How long a price quote stays fresh (seconds).
    pub price_cache_ttl_secs: u64,

    /// How long a market's interest rates stay fresh (seconds).
    pub rate_cache_ttl_secs: u64,

    /// Fraction of the deposit yield kept by the protocol (0.0 - 1.0).
    pub yield_cut: f64,

    // ==========================================
    // OUTBOUND INTEGRATIONS
    // ==========================================

    /// Waitlist spreadsheet, if configured.
    pub spreadsheet: Option<SpreadsheetConfig>,

    /// Website CMS, if configured.
    pub cms: Option<CmsConfig>,

    /// Transactional email API key, if configured.
    pub email_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            vault_program_id: DEFAULT_VAULT_PROGRAM_ID.to_string(),
            margin_program_id: DEFAULT_MARGIN_PROGRAM_ID.to_string(),
            lookup_table_addresses: Vec::new(),
            rpc_retry_attempts: 3,
            rpc_retry_delay_ms: 1_000,
            rpc_timeout_secs: 10,
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            price_api_url: "https://api.coingecko.com/api/v3".to_string(),
            price_cache_ttl_secs: 60,
            rate_cache_ttl_secs: 60,
            yield_cut: 0.5,
            spreadsheet: None,
            cms: None,
            email_api_key: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Every setting has a default except the integration credentials,
    /// which stay `None` unless all of their variables are present.
    /// Use `dotenvy::dotenv()` before calling this to load from `.env` file.
    ///
    /// ## Returns
    ///
    /// - `Ok(AppConfig)` - Configuration loaded successfully
    /// - `Err(ConfigError)` - A variable is present but invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let yield_cut: f64 = parse_env_or("YIELD_CUT", defaults.yield_cut)?;
        if !(0.0..=1.0).contains(&yield_cut) {
            return Err(ConfigError::InvalidValue(
                "YIELD_CUT".to_string(),
                format!("{} is outside 0.0..=1.0", yield_cut),
            ));
        }

        let rpc_retry_attempts: u32 = parse_env_or("RPC_RETRY_ATTEMPTS", defaults.rpc_retry_attempts)?;
        if rpc_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RPC_RETRY_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            // Solana
            solana_rpc_url: get_env_or_default("SOLANA_RPC_URL", &defaults.solana_rpc_url),
            vault_program_id: get_env_or_default("VAULT_PROGRAM_ID", &defaults.vault_program_id),
            margin_program_id: get_env_or_default("MARGIN_PROGRAM_ID", &defaults.margin_program_id),
            lookup_table_addresses: split_list(&get_env_or_default("LOOKUP_TABLE_ADDRESSES", "")),

            // RPC resilience
            rpc_retry_attempts,
            rpc_retry_delay_ms: parse_env_or("RPC_RETRY_DELAY_MS", defaults.rpc_retry_delay_ms)?,
            rpc_timeout_secs: parse_env_or("RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs)?,

            // Server
            server_host: get_env_or_default("SERVER_HOST", &defaults.server_host),
            server_port: parse_env_or("SERVER_PORT", defaults.server_port)?,

            // Market data
            price_api_url: get_env_or_default("PRICE_API_URL", &defaults.price_api_url),
            price_cache_ttl_secs: parse_env_or("PRICE_CACHE_TTL_SECS", defaults.price_cache_ttl_secs)?,
            rate_cache_ttl_secs: parse_env_or("RATE_CACHE_TTL_SECS", defaults.rate_cache_ttl_secs)?,
            yield_cut,

            // Integrations
            spreadsheet: spreadsheet_from_env()?,
            cms: cms_from_env()?,
            email_api_key: env::var("BREVO_API_KEY").ok(),
        })
    }
}

fn spreadsheet_from_env() -> Result<Option<SpreadsheetConfig>, ConfigError> {
    let Some(values) = optional_group(&[
        "GOOGLE_CLIENT_EMAIL",
        "GOOGLE_PRIVATE_KEY",
        "GOOGLE_SPREADSHEET_ID",
    ])?
    else {
        return Ok(None);
    };
    let [client_email, private_key, spreadsheet_id]: [String; 3] = values
        .try_into()
        .map_err(|_| ConfigError::InvalidValue("GOOGLE_*".to_string(), "incomplete group".to_string()))?;

    Ok(Some(SpreadsheetConfig {
        client_email,
        private_key,
        spreadsheet_id,
    }))
}

fn cms_from_env() -> Result<Option<CmsConfig>, ConfigError> {
    let Some(values) = optional_group(&[
        "WEBFLOW_ACCESS_TOKEN",
        "WEBFLOW_COLLECTION_ID",
        "WEBFLOW_WAITLIST_ITEM_ID",
        "WEBFLOW_YIELD_ITEM_ID",
        "WEBFLOW_VALUE_LOST_ITEM_ID",
    ])?
    else {
        return Ok(None);
    };
    let [access_token, collection_id, waitlist_item_id, yield_item_id, value_lost_item_id]: [String; 5] =
        values
            .try_into()
            .map_err(|_| ConfigError::InvalidValue("WEBFLOW_*".to_string(), "incomplete group".to_string()))?;

    Ok(Some(CmsConfig {
        access_token,
        collection_id,
        waitlist_item_id,
        yield_item_id,
        value_lost_item_id,
    }))
}

/// Read a group of variables that must be set together.
///
/// Returns `None` when none of them is set and an error naming the first
/// missing variable when only some are.
fn optional_group(keys: &[&str]) -> Result<Option<Vec<String>>, ConfigError> {
    let values: Vec<Option<String>> = keys.iter().map(|key| env::var(key).ok()).collect();

    if values.iter().all(Option::is_none) {
        return Ok(None);
    }

    keys.iter()
        .zip(values)
        .map(|(key, value)| value.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string())))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Get an environment variable with a default value.
///
/// Returns the default if the variable is not set.
fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
///
/// A variable that is set but unparsable is an error rather than a
/// silent fallback.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_or_default() {
        // Should return default when not set
        let value = get_env_or_default("NONEXISTENT_VAR_12345", "default_value");
        assert_eq!(value, "default_value");
    }

    #[test]
    fn test_parse_env_or_uses_default_when_unset() {
        let value: u64 = parse_env_or("NONEXISTENT_VAR_67890", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_env_or_rejects_garbage() {
        env::set_var("RISK_BACKEND_TEST_BAD_PORT", "eighty");
        let result: Result<u16, _> = parse_env_or("RISK_BACKEND_TEST_BAD_PORT", 8080);
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
        env::remove_var("RISK_BACKEND_TEST_BAD_PORT");
    }

    #[test]
    fn test_optional_group_requires_all_or_nothing() {
        assert!(optional_group(&["RISK_BACKEND_TEST_UNSET_A", "RISK_BACKEND_TEST_UNSET_B"])
            .unwrap()
            .is_none());

        env::set_var("RISK_BACKEND_TEST_GROUP_A", "value");
        let result = optional_group(&["RISK_BACKEND_TEST_GROUP_A", "RISK_BACKEND_TEST_GROUP_B"]);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(key)) if key == "RISK_BACKEND_TEST_GROUP_B"));
        env::remove_var("RISK_BACKEND_TEST_GROUP_A");
    }

    #[test]
    fn test_split_list() {
        assert!(split_list("").is_empty());
        assert_eq!(split_list(" a, ,b "), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.rpc_retry_attempts, 3);
        assert_eq!(config.rpc_retry_delay_ms, 1_000);
        assert_eq!(config.price_cache_ttl_secs, 60);
        assert!(config.spreadsheet.is_none());
    }
}
