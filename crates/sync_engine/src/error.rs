use std::time::Duration;

use shared::{
    domain::ContactId,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error("conversation '{0}' not found")]
    NotFound(ContactId),
    #[error("{0}")]
    Gateway(String),
    #[error("gateway did not acknowledge the send within {}ms", .0.as_millis())]
    GatewayTimeout(Duration),
    #[error("failed to persist conversations: {0:#}")]
    Storage(anyhow::Error),
    #[error("{0}")]
    Internal(String),
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        let code = match &value {
            SyncError::Validation(_) => ErrorCode::Validation,
            SyncError::NotFound(_) => ErrorCode::NotFound,
            SyncError::Gateway(_) => ErrorCode::Gateway,
            SyncError::GatewayTimeout(_) => ErrorCode::GatewayTimeout,
            SyncError::Storage(_) => ErrorCode::Storage,
            SyncError::Internal(_) => ErrorCode::Internal,
        };
        ApiError::new(code, value.to_string())
    }
}
