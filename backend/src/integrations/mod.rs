//! # Integrations Module
//!
//! Thin clients for the marketing side of the backend. None of them is
//! retried; a failure surfaces as `ServiceError::Integration`.
//!
//! | Trait | Implementation | Used for |
//! |-------|----------------|----------|
//! | `Spreadsheet` | `GoogleSheets` | waitlist rows |
//! | `Cms` | `WebflowCms` | website counters (waitlist, yield, value lost) |
//! | `Mailer` | `BrevoMailer` | waitlist welcome email |

pub mod brevo;
pub mod sheets;
pub mod webflow;

pub use brevo::BrevoMailer;
pub use sheets::GoogleSheets;
pub use webflow::WebflowCms;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from third-party HTTP services.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },

    #[error("{service} answered {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} authentication failed: {message}")]
    Auth { service: &'static str, message: String },

    #[error("{service} returned unusable data: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

impl IntegrationError {
    pub(crate) fn request(service: &'static str, err: reqwest::Error) -> Self {
        IntegrationError::Request {
            service,
            message: err.to_string(),
        }
    }
}

/// Row storage for the waitlist.
#[async_trait]
pub trait Spreadsheet: Send + Sync {
    /// Rows of `range` (A1 notation), each row a list of cell values.
    async fn read_rows(&self, range: &str) -> Result<Vec<Vec<String>>, IntegrationError>;

    /// Append one row after the last row of `range`.
    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<(), IntegrationError>;
}

/// Fields of a website counter item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmsItemFields {
    pub name: &'static str,
    pub slug: &'static str,
    pub count: Value,
}

/// Content management for the public website.
#[async_trait]
pub trait Cms: Send + Sync {
    /// Replace the fields of a published item.
    async fn update_item(&self, item_id: &str, fields: CmsItemFields) -> Result<(), IntegrationError>;
}

/// Transactional email.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send template `template_id` to one recipient.
    async fn send_template(
        &self,
        template_id: u32,
        email: &str,
        name: &str,
        params: Value,
    ) -> Result<(), IntegrationError>;
}

/// Turn a non-2xx response into `IntegrationError::Status`.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(IntegrationError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}
