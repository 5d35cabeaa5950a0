//! Brevo transactional email client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ensure_success, IntegrationError, Mailer};

const SERVICE: &str = "Brevo";
const SEND_EMAIL_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Clone)]
pub struct BrevoMailer {
    client: Client,
    api_key: String,
}

impl BrevoMailer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl Mailer for BrevoMailer {
    async fn send_template(
        &self,
        template_id: u32,
        email: &str,
        name: &str,
        params: Value,
    ) -> Result<(), IntegrationError> {
        let response = self
            .client
            .post(SEND_EMAIL_URL)
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .json(&json!({
                "templateId": template_id,
                "to": [{ "email": email, "name": name }],
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| IntegrationError::request(SERVICE, e))?;

        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}
