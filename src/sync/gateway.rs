use async_trait::async_trait;
use thiserror::Error;

use crate::git::{
    CommitInfo, GitConfig, GitConfigUpdate, RemoteFileInfo, RemoteSyncOutcome, RepoStatus,
};

/// Errors from the remote storage gateway.
///
/// A missing remote file is NOT an error — `read` reports it through
/// [`RemoteFileResult::found`]. `NotFound` only surfaces for operations
/// where absence is a genuine failure (rename, delete, history).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result of reading one file from the remote store.
#[derive(Debug, Clone, Default)]
pub struct RemoteFileResult {
    /// False when the file does not exist remotely; distinct from a
    /// transport or server failure, which is an `Err`.
    pub found: bool,
    pub content: Option<String>,
    pub last_commit: Option<CommitInfo>,
}

impl RemoteFileResult {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Operations against the server-side Git repository.
///
/// Every write is atomic from the caller's perspective: the remote file
/// and its commit log both reflect the new content, or neither does.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<RemoteFileResult>;

    async fn write(&self, name: &str, content: &str, commit_message: &str) -> Result<CommitInfo>;

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<CommitInfo>;

    async fn delete(&self, name: &str) -> Result<CommitInfo>;

    /// Discovery of files unknown locally.
    async fn list_all(&self) -> Result<Vec<RemoteFileInfo>>;

    async fn status(&self) -> Result<RepoStatus>;

    async fn history(&self, name: &str, limit: usize) -> Result<Vec<CommitInfo>>;

    /// Config plus the server's public SSH key, if provisioned.
    async fn get_config(&self) -> Result<(GitConfig, Option<String>)>;

    async fn update_config(&self, update: GitConfigUpdate) -> Result<GitConfig>;

    /// Explicit fetch/merge/push against the configured remote,
    /// independent of the per-file coordination flow.
    async fn remote_sync(&self) -> Result<RemoteSyncOutcome>;
}
