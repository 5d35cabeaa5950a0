//! # Service Errors
//!
//! One error type shared by every service, so that handlers can map any
//! failure to a client-fault or server-fault response without knowing
//! which component raised it.
//!
//! | Variant | Status | Retried? |
//! |---------|--------|----------|
//! | `InvalidInput` | 400 | never (checked before any network call) |
//! | `NotAUser` | 400 | never |
//! | `Rpc` (transient) | 503 | yes, until the attempt budget is spent |
//! | `Rpc` (other) | 502 | no |
//! | `Consistency` | 500 | no |
//! | `PriceService` | 502 | no |
//! | `Integration` | 502 | no |
//! | `NotConfigured` | 500 | no |
//! | `Transaction` | 500 | no |

use actix_web::http::StatusCode;

use crate::integrations::IntegrationError;
use crate::margin::MarginError;
use crate::protocol::accounts::AccountDecodeError;
use crate::services::retry::Transient;
use crate::solana::RpcError;

/// Errors surfaced by the risk engine services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Missing or malformed request input.
    #[error("{0}")]
    InvalidInput(String),

    /// The address has no vault or no paired risk account.
    #[error("Address is not a protocol user: {0}")]
    NotAUser(String),

    /// Ledger read failed (after retries, when the failure was transient).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// On-chain state that must exist together does not.
    ///
    /// Retrying cannot fix a structural mismatch, so this is surfaced
    /// immediately.
    #[error("Consistency fault: {0}")]
    Consistency(String),

    /// The price service failed or answered with something unusable.
    #[error("Price service error: {0}")]
    PriceService(String),

    /// Spreadsheet, CMS or email call failed.
    #[error(transparent)]
    Integration(#[from] IntegrationError),

    /// The endpoint depends on an integration without credentials.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Building, signing or serializing a transaction failed.
    #[error("Transaction assembly failed: {0}")]
    Transaction(String),
}

impl From<AccountDecodeError> for ServiceError {
    fn from(err: AccountDecodeError) -> Self {
        ServiceError::Consistency(err.to_string())
    }
}

impl From<MarginError> for ServiceError {
    fn from(err: MarginError) -> Self {
        ServiceError::Consistency(err.to_string())
    }
}

impl Transient for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Rpc(e) if e.is_transient())
    }
}

impl ServiceError {
    /// Machine readable code for the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::NotAUser(_) => "NOT_A_USER",
            ServiceError::Rpc(e) if e.is_transient() => "RPC_UNAVAILABLE",
            ServiceError::Rpc(_) => "RPC_ERROR",
            ServiceError::Consistency(_) => "CONSISTENCY_FAULT",
            ServiceError::PriceService(_) => "PRICE_SERVICE_ERROR",
            ServiceError::Integration(_) => "INTEGRATION_ERROR",
            ServiceError::NotConfigured(_) => "NOT_CONFIGURED",
            ServiceError::Transaction(_) => "TRANSACTION_BUILD_FAILED",
        }
    }

    /// HTTP status class for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::NotAUser(_) => StatusCode::BAD_REQUEST,
            ServiceError::Rpc(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Rpc(_) | ServiceError::PriceService(_) | ServiceError::Integration(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Consistency(_)
            | ServiceError::NotConfigured(_)
            | ServiceError::Transaction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors the caller caused.
    pub fn is_client_fault(&self) -> bool {
        self.status_code().is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_client_faults() {
        assert!(ServiceError::InvalidInput("bad".into()).is_client_fault());
        assert!(ServiceError::NotAUser("x".into()).is_client_fault());
    }

    #[test]
    fn test_exhausted_transient_rpc_maps_to_503() {
        let err = ServiceError::from(RpcError::Unavailable("503 Service Unavailable".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "RPC_UNAVAILABLE");
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_failures_are_server_faults() {
        let err = ServiceError::from(RpcError::Request("invalid param".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!err.is_transient());

        let err = ServiceError::Consistency("vault without risk account".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_client_fault());
    }
}
