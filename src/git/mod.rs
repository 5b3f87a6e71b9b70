//! Git Integration Module
//!
//! Git-backed storage for todo.txt files:
//! - One commit per file mutation
//! - Per-file history via git log
//! - Remote fetch/merge/push with conflict reporting

mod backend;
mod repository;

pub use backend::{
    GitBackend, GitBackendError, GitConfig, GitConfigUpdate, RemoteFileInfo, RemoteSyncOutcome,
};
pub use repository::{CommitInfo, GitOperationError, MergeOutcome, RepoStatus};
