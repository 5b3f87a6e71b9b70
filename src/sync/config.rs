use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Current sync state for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Git sync is not enabled
    Disabled,
    /// In sync with the remote, nothing to do
    Idle,
    /// A coordination run is in progress
    Syncing,
    /// A local change is waiting for a commit (visible while offline)
    Pending,
    /// Device is offline
    Offline,
    /// Last coordination run failed
    Error,
}

/// The last communicated sync outcome. Ephemeral, recomputed on every
/// coordination run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Human-readable detail, empty unless the state warrants one.
    pub message: String,
    /// The file the status refers to; absent for disabled reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl SyncStatus {
    pub fn new(state: SyncState, message: impl Into<String>, file_path: Option<&str>) -> Self {
        Self {
            state,
            message: message.into(),
            file_path: file_path.map(String::from),
        }
    }
}

/// Fire-and-forget status sink. Called exactly once per coordination
/// run with the final outcome (plus an initial `syncing` report when a
/// run passes its preconditions); must not panic.
pub type StatusObserver = Arc<dyn Fn(SyncStatus) + Send + Sync>;

/// Invoked with the file path after a coordination run overwrites that
/// file's local records, so the presentation layer can refresh.
pub type RenderCallback = Arc<dyn Fn(&str) + Send + Sync>;
