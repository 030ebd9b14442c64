//! Credential adapters for the HTTP remote.

use async_trait::async_trait;
use notes_core::credentials::{CredentialError, CredentialProvider};
use notes_core::settings::{keys, set_typed, SettingsStore};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth refresh-token credentials.
///
/// Access tokens are short-lived; a rejected one is replaced by exchanging the
/// refresh token at `{api}/oauth2/token`. New tokens are written back to the
/// settings store.
pub struct RefreshTokenCredentials {
    client: Client,
    token_url: String,
    app_key: String,
    refresh_token: Mutex<String>,
    access_token: Mutex<Option<String>>,
    settings: Arc<dyn SettingsStore>,
}

impl RefreshTokenCredentials {
    pub fn new(
        api_url: &str,
        app_key: impl Into<String>,
        refresh_token: impl Into<String>,
        access_token: Option<String>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            client: Client::new(),
            token_url: format!("{}/oauth2/token", api_url.trim_end_matches('/')),
            app_key: app_key.into(),
            refresh_token: Mutex::new(refresh_token.into()),
            access_token: Mutex::new(access_token),
            settings,
        }
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenCredentials {
    async fn bearer(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.access_token.lock().await.clone() {
            return Ok(token);
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, CredentialError> {
        let mut refresh_token = self.refresh_token.lock().await;
        if refresh_token.is_empty() {
            return Err(CredentialError::RefreshUnavailable);
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.app_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CredentialError::RefreshFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        info!("Refreshed remote access token");
        if let Some(rotated) = tokens.refresh_token {
            *refresh_token = rotated;
            if let Err(e) =
                set_typed(self.settings.as_ref(), keys::REFRESH_TOKEN, refresh_token.as_str()).await
            {
                warn!("Failed to store refresh token: {}", e);
            }
        }
        if let Err(e) =
            set_typed(self.settings.as_ref(), keys::ACCESS_TOKEN, &tokens.access_token).await
        {
            warn!("Failed to store access token: {}", e);
        }

        *self.access_token.lock().await = Some(tokens.access_token.clone());
        Ok(tokens.access_token)
    }
}
