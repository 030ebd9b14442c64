//! Remote store over the Dropbox v2 file API.
//!
//! RPC endpoints (`list_folder`, `create_folder_v2`, `delete_v2`) live on the
//! API host and take JSON bodies. Content endpoints (`upload`, `download`) live
//! on the content host and carry their arguments in the `Dropbox-API-Arg`
//! header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notes_core::remote::{RemoteEntry, RemoteError, RemoteStore, Result};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

const API_ARG_HEADER: &str = "Dropbox-API-Arg";

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag", default)]
    tag: Option<String>,
    name: String,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    server_modified: Option<DateTime<Utc>>,
}

impl Metadata {
    fn is_file(&self) -> bool {
        // Upload responses carry no tag and always describe a file
        self.tag.as_deref().is_none_or(|tag| tag == "file")
    }

    fn into_entry(self, folder: &str) -> RemoteEntry {
        let path = self
            .path_display
            .unwrap_or_else(|| notes_core::remote::join(folder, &self.name));
        RemoteEntry {
            name: self.name,
            path,
            modified: self.server_modified.unwrap_or_else(Utc::now),
        }
    }
}

/// Dropbox-style HTTP remote
pub struct HttpRemote {
    client: Client,
    api_url: String,
    content_url: String,
}

impl HttpRemote {
    pub fn new(api_url: &str, content_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            content_url: content_url.trim_end_matches('/').to_string(),
        })
    }

    async fn rpc(&self, token: &str, endpoint: &str, body: serde_json::Value, path: &str) -> Result<Response> {
        debug!("POST {} {}", endpoint, path);
        let response = self
            .client
            .post(format!("{}/2/files/{}", self.api_url, endpoint))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        check(response, path).await
    }
}

/// Map API failures onto `RemoteError`.
async fn check(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::CONFLICT if body.contains("not_found") => RemoteError::NotFound(path.to_string()),
        StatusCode::CONFLICT if body.contains("conflict") => RemoteError::AlreadyExists(path.to_string()),
        _ => RemoteError::Http {
            status: status.as_u16(),
            body,
        },
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so
/// other characters are written as `\u` escapes.
fn api_arg(value: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn list_folder(&self, token: &str, path: &str) -> Result<Vec<RemoteEntry>> {
        let response = self
            .rpc(token, "list_folder", json!({ "path": path, "recursive": false }), path)
            .await?;
        let mut page: ListFolderResponse = decode(response).await?;
        let mut entries = Vec::new();

        loop {
            entries.extend(
                page.entries
                    .into_iter()
                    .filter(Metadata::is_file)
                    .map(|m| m.into_entry(path)),
            );
            if !page.has_more {
                break;
            }
            let response = self
                .rpc(token, "list_folder/continue", json!({ "cursor": page.cursor }), path)
                .await?;
            page = decode(response).await?;
        }

        Ok(entries)
    }

    async fn create_folder(&self, token: &str, path: &str) -> Result<()> {
        self.rpc(token, "create_folder_v2", json!({ "path": path, "autorename": false }), path)
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> Result<RemoteEntry> {
        let mode = if overwrite { "overwrite" } else { "add" };
        let arg = json!({ "path": path, "mode": mode, "autorename": false, "mute": true });
        debug!("upload {} ({} bytes)", path, content.len());

        let response = self
            .client
            .post(format!("{}/2/files/upload", self.content_url))
            .bearer_auth(token)
            .header(API_ARG_HEADER, api_arg(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let metadata: Metadata = decode(check(response, path).await?).await?;

        let folder = path.rsplit_once('/').map(|(folder, _)| folder).unwrap_or("");
        Ok(metadata.into_entry(folder))
    }

    async fn download(&self, token: &str, path: &str) -> Result<Vec<u8>> {
        debug!("download {}", path);
        let response = self
            .client
            .post(format!("{}/2/files/download", self.content_url))
            .bearer_auth(token)
            .header(API_ARG_HEADER, api_arg(&json!({ "path": path })))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let bytes = check(response, path)
            .await?
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, token: &str, path: &str) -> Result<()> {
        self.rpc(token, "delete_v2", json!({ "path": path }), path)
            .await?;
        Ok(())
    }
}
