//! Bearer credentials for the remote store.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Not signed in")]
    Missing,

    #[error("Credential cannot be refreshed")]
    RefreshUnavailable,

    #[error("Refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of the bearer token sent with every remote call.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token.
    async fn bearer(&self) -> Result<String, CredentialError>;

    /// Obtain a fresh token after the remote rejected the current one.
    async fn refresh(&self) -> Result<String, CredentialError>;
}

/// A fixed token. It cannot be refreshed.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer(&self) -> Result<String, CredentialError> {
        if self.token.is_empty() {
            Err(CredentialError::Missing)
        } else {
            Ok(self.token.clone())
        }
    }

    async fn refresh(&self) -> Result<String, CredentialError> {
        Err(CredentialError::RefreshUnavailable)
    }
}

#[async_trait]
impl<T: CredentialProvider + ?Sized> CredentialProvider for std::sync::Arc<T> {
    async fn bearer(&self) -> Result<String, CredentialError> {
        (**self).bearer().await
    }

    async fn refresh(&self) -> Result<String, CredentialError> {
        (**self).refresh().await
    }
}
