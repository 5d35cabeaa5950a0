//! Google Sheets client authenticated as a service account.
//!
//! ```text
//! 1. Sign a JWT (RS256) with the service account key
//! 2. Exchange it at the OAuth token endpoint for an access token
//! 3. Call the Sheets values API with the bearer token
//! ```
//!
//! A token is requested per call; the waitlist endpoint is low volume.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ensure_success, IntegrationError, Spreadsheet};
use crate::config::SpreadsheetConfig;

const SERVICE: &str = "Google Sheets";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Sheets API client for one spreadsheet.
#[derive(Clone)]
pub struct GoogleSheets {
    client: Client,
    config: SpreadsheetConfig,
}

impl GoogleSheets {
    pub fn new(config: SpreadsheetConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Signed JWT assertion for the token exchange.
    fn assertion(&self) -> Result<String, IntegrationError> {
        let now = Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &self.config.client_email,
            scope: SPREADSHEETS_SCOPE,
            aud: TOKEN_URL,
            exp: now + TOKEN_LIFETIME_SECS,
            iat: now,
        };

        // keys from .env files carry escaped newlines
        let pem = self.config.private_key.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| IntegrationError::Auth {
            service: SERVICE,
            message: e.to_string(),
        })?;

        encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| IntegrationError::Auth {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    async fn access_token(&self) -> Result<String, IntegrationError> {
        let assertion = self.assertion()?;

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| IntegrationError::request(SERVICE, e))?;

        let token: TokenResponse = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::Auth {
                service: SERVICE,
                message: e.to_string(),
            })?;

        Ok(token.access_token)
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/{}/values/{}", SHEETS_API_URL, self.config.spreadsheet_id, range)
    }
}

#[async_trait]
impl Spreadsheet for GoogleSheets {
    async fn read_rows(&self, range: &str) -> Result<Vec<Vec<String>>, IntegrationError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.values_url(range))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IntegrationError::request(SERVICE, e))?;

        let body: ValueRange = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::InvalidResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;

        debug!("Read {} rows from {}", body.values.len(), range);
        Ok(body.values)
    }

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), IntegrationError> {
        let token = self.access_token().await?;
        let url = format!("{}:append", self.values_url(range));

        let response = self
            .client
            .post(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| IntegrationError::request(SERVICE, e))?;

        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_private_key_is_auth_error() {
        let sheets = GoogleSheets::new(SpreadsheetConfig {
            client_email: "svc@project.iam.gserviceaccount.com".to_string(),
            private_key: "not a key".to_string(),
            spreadsheet_id: "sheet".to_string(),
        });

        assert!(matches!(sheets.assertion(), Err(IntegrationError::Auth { .. })));
    }

    #[test]
    fn test_values_url() {
        let sheets = GoogleSheets::new(SpreadsheetConfig {
            client_email: String::new(),
            private_key: String::new(),
            spreadsheet_id: "abc".to_string(),
        });

        assert_eq!(
            sheets.values_url("waitlist!B:B"),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/waitlist!B:B"
        );
    }
}
