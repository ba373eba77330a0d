use service_core::error::AppError;

use super::identity::IdentityError;
use super::jwt::TokenError;
use super::token_authority::{IssueError, RotateError};
use crate::store::StoreError;

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Unauthorized(anyhow::anyhow!(err))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Store(e) => {
                tracing::error!(error = %e, "Token store failure while issuing credentials");
                AppError::ServiceUnavailable("Session store unavailable".to_string())
            }
            IssueError::Signing(e) => AppError::InternalError(e),
        }
    }
}

impl From<RotateError> for AppError {
    fn from(err: RotateError) -> Self {
        match err {
            RotateError::Expired
            | RotateError::Revoked
            | RotateError::Reused
            | RotateError::Unknown => AppError::Unauthorized(anyhow::anyhow!(err)),
            // The presented token is left unconsumed, so the caller may
            // retry with the same credentials.
            RotateError::Store(e) => {
                tracing::error!(error = %e, "Token store failure during rotation");
                AppError::Unauthorized(anyhow::anyhow!("Session could not be renewed"))
            }
            RotateError::Issue(e) => {
                tracing::error!(error = %e, "Failed to mint credentials during rotation");
                AppError::Unauthorized(anyhow::anyhow!("Session could not be renewed"))
            }
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AuthFailed => AppError::Unauthorized(anyhow::anyhow!("Invalid credentials")),
            IdentityError::Unavailable(msg) => {
                tracing::error!(error = %msg, "Identity backend unavailable");
                AppError::BadGateway("identity backend unavailable".to_string())
            }
            IdentityError::Timeout => {
                AppError::GatewayTimeout("identity backend did not respond".to_string())
            }
        }
    }
}
