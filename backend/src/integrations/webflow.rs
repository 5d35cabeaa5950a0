//! Webflow CMS client (v2 API, live items).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{ensure_success, Cms, CmsItemFields, IntegrationError};
use crate::config::CmsConfig;

const SERVICE: &str = "Webflow";
const WEBFLOW_API_URL: &str = "https://api.webflow.com/v2";

#[derive(Clone)]
pub struct WebflowCms {
    client: Client,
    access_token: String,
    collection_id: String,
}

impl WebflowCms {
    pub fn new(config: &CmsConfig) -> Self {
        Self {
            client: Client::new(),
            access_token: config.access_token.clone(),
            collection_id: config.collection_id.clone(),
        }
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/collections/{}/items/{}/live", WEBFLOW_API_URL, self.collection_id, item_id)
    }
}

#[async_trait]
impl Cms for WebflowCms {
    async fn update_item(&self, item_id: &str, fields: CmsItemFields) -> Result<(), IntegrationError> {
        debug!("Updating CMS item {} ({})", item_id, fields.slug);

        let response = self
            .client
            .patch(self.item_url(item_id))
            .bearer_auth(&self.access_token)
            .json(&json!({ "id": item_id, "fieldData": fields }))
            .send()
            .await
            .map_err(|e| IntegrationError::request(SERVICE, e))?;

        ensure_success(SERVICE, response).await?;
        Ok(())
    }
}
