//! Remote file store abstraction.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing
//! - `HttpRemote` (in notes-daemon) - Dropbox-style HTTP file API
//!
//! Remote paths are absolute (`/Notes/<id>.md`). Every call carries the bearer
//! credential so the caller decides when to refresh it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Remote rejected the credential")]
    Unauthorized,

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Remote path already exists: {0}")]
    AlreadyExists(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// A file in a remote folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name without the folder
    pub name: String,
    /// Full remote path
    pub path: String,
    /// Server-side modification time
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Files directly inside `path`, all pages.
    async fn list_folder(&self, token: &str, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Create a folder. Fails with `AlreadyExists` if it is there.
    async fn create_folder(&self, token: &str, path: &str) -> Result<()>;

    /// Store `content` at `path`. Without `overwrite` an existing file is an error.
    ///
    /// Returns the stored file's listing entry.
    async fn upload(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> Result<RemoteEntry>;

    async fn download(&self, token: &str, path: &str) -> Result<Vec<u8>>;

    async fn delete(&self, token: &str, path: &str) -> Result<()>;
}

/// Join a folder and a file name into a remote path.
pub fn join(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

struct RemoteFile {
    content: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory remote for testing. Counts calls and can demand a token.
#[derive(Default)]
pub struct InMemoryRemote {
    files: RwLock<BTreeMap<String, RemoteFile>>,
    folders: RwLock<BTreeSet<String>>,
    accepted_token: RwLock<Option<String>>,
    /// Per-path errors returned by upload, download and delete
    failures: RwLock<BTreeMap<String, RemoteError>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    deletes: AtomicUsize,
    unauthorized: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call whose bearer differs from `token`.
    pub fn accept_only(&self, token: &str) {
        *self.accepted_token.write().unwrap() = Some(token.to_string());
    }

    /// Make every transfer or delete of `path` fail with `error`.
    pub fn fail_path(&self, path: &str, error: RemoteError) {
        self.failures.write().unwrap().insert(normalize(path), error);
    }

    pub fn clear_failures(&self) {
        self.failures.write().unwrap().clear();
    }

    /// Seed a folder without going through `create_folder`.
    pub fn add_folder(&self, path: &str) {
        self.folders.write().unwrap().insert(normalize(path));
    }

    /// Seed a file with an explicit modification time.
    pub fn put(&self, path: &str, content: &[u8], modified: DateTime<Utc>) {
        let path = normalize(path);
        if let Some(parent) = parent(&path) {
            self.add_folder(&parent);
        }
        self.files.write().unwrap().insert(
            path,
            RemoteFile {
                content: content.to_vec(),
                modified,
            },
        );
    }

    pub fn set_modified(&self, path: &str, modified: DateTime<Utc>) {
        if let Some(file) = self.files.write().unwrap().get_mut(&normalize(path)) {
            file.modified = modified;
        }
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(&normalize(path))
            .map(|f| f.content.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.read().unwrap().contains_key(&normalize(path))
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.folders.read().unwrap().contains(&normalize(path))
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Calls rejected with `Unauthorized`.
    pub fn unauthorized_count(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    fn check(&self, token: &str) -> Result<()> {
        match self.accepted_token.read().unwrap().as_deref() {
            Some(accepted) if accepted != token => {
                self.unauthorized.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Unauthorized)
            }
            _ => Ok(()),
        }
    }

    fn injected(&self, path: &str) -> Result<()> {
        match self.failures.read().unwrap().get(path) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

fn parent(path: &str) -> Option<String> {
    let pos = path.rfind('/')?;
    (pos > 0).then(|| path[..pos].to_string())
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list_folder(&self, token: &str, path: &str) -> Result<Vec<RemoteEntry>> {
        self.check(token)?;
        let folder = normalize(path);
        if !self.folders.read().unwrap().contains(&folder) {
            return Err(RemoteError::NotFound(folder));
        }
        let files = self.files.read().unwrap();
        Ok(files
            .iter()
            .filter(|(p, _)| parent(p).as_deref() == Some(folder.as_str()))
            .map(|(p, f)| RemoteEntry {
                name: p[folder.len() + 1..].to_string(),
                path: p.clone(),
                modified: f.modified,
            })
            .collect())
    }

    async fn create_folder(&self, token: &str, path: &str) -> Result<()> {
        self.check(token)?;
        let folder = normalize(path);
        if !self.folders.write().unwrap().insert(folder.clone()) {
            return Err(RemoteError::AlreadyExists(folder));
        }
        Ok(())
    }

    async fn upload(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> Result<RemoteEntry> {
        self.check(token)?;
        let path = normalize(path);
        self.injected(&path)?;
        if !overwrite && self.files.read().unwrap().contains_key(&path) {
            return Err(RemoteError::AlreadyExists(path));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let modified = Utc::now();
        self.put(&path, content, modified);
        Ok(RemoteEntry {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path,
            modified,
        })
    }

    async fn download(&self, token: &str, path: &str) -> Result<Vec<u8>> {
        self.check(token)?;
        let path = normalize(path);
        self.injected(&path)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.content(&path).ok_or(RemoteError::NotFound(path))
    }

    async fn delete(&self, token: &str, path: &str) -> Result<()> {
        self.check(token)?;
        let path = normalize(path);
        self.injected(&path)?;
        match self.files.write().unwrap().remove(&path) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RemoteError::NotFound(path)),
        }
    }
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    async fn list_folder(&self, token: &str, path: &str) -> Result<Vec<RemoteEntry>> {
        (**self).list_folder(token, path).await
    }

    async fn create_folder(&self, token: &str, path: &str) -> Result<()> {
        (**self).create_folder(token, path).await
    }

    async fn upload(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> Result<RemoteEntry> {
        (**self).upload(token, path, content, overwrite).await
    }

    async fn download(&self, token: &str, path: &str) -> Result<Vec<u8>> {
        (**self).download(token, path).await
    }

    async fn delete(&self, token: &str, path: &str) -> Result<()> {
        (**self).delete(token, path).await
    }
}
