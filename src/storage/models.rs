use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Virtual path of the default todo file. Always present in the workspace
/// and never renamed or deleted.
pub const DEFAULT_FILE_PATH: &str = "/todo.txt";

/// Display name of the default todo file.
pub const DEFAULT_FILE_NAME: &str = "todo.txt";

/// A single task line within one todo file.
///
/// The `text` is the raw todo.txt representation; richer parsing
/// (priorities, contexts, projects) is the presentation layer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    pub text: String,
}

impl TaskRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// A todo file known to the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    /// Absolute virtual path, always beginning with '/'.
    pub path: String,
}

impl FileDescriptor {
    pub fn default_file() -> Self {
        Self {
            name: DEFAULT_FILE_NAME.to_string(),
            path: DEFAULT_FILE_PATH.to_string(),
        }
    }
}

/// Workspace document: the list of known files, the active-file pointer
/// and the sync toggle. Persisted as `workspace.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub files: Vec<FileDescriptor>,
    pub active_path: String,
    pub sync_enabled: bool,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            files: vec![FileDescriptor::default_file()],
            active_path: DEFAULT_FILE_PATH.to_string(),
            sync_enabled: false,
        }
    }
}

impl Workspace {
    /// The default descriptor must always be present, first in the list.
    pub fn ensure_default_file(&mut self) {
        if !self.files.iter().any(|f| f.path == DEFAULT_FILE_PATH) {
            self.files.insert(0, FileDescriptor::default_file());
        }
    }
}

/// Per-file document holding the task list and sync bookkeeping.
/// Persisted as `files/<sanitized path>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDocument {
    pub tasks: Vec<TaskRecord>,
    /// When the task list was last persisted locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_local: Option<DateTime<Utc>>,
    /// When the file last completed a successful sync run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Hash of the last remote commit this file was synced against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_remote_commit: Option<String>,
}

/// Broadcast whenever a file's task list is persisted locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub file_path: String,
}

/// Join task records into the raw file content, one task per line.
pub fn tasks_to_content(tasks: &[TaskRecord]) -> String {
    tasks
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse raw file content into task records with fresh ids.
/// Blank lines are dropped; surrounding whitespace is trimmed.
pub fn content_to_tasks(content: &str) -> Vec<TaskRecord> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TaskRecord::new)
        .collect()
}
