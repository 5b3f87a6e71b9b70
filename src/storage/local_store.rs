use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::models::{
    content_to_tasks, FileDescriptor, FileDocument, LocalChange, TaskRecord, Workspace,
    DEFAULT_FILE_PATH,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("The default file cannot be renamed or removed")]
    DefaultFileProtected,

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Per-file persistence of task records and workspace metadata, keyed by
/// virtual file path. One JSON document per file under `files/`, plus a
/// single `workspace.json` for the known-file list, active pointer and
/// sync toggle.
pub struct LocalStore {
    base_path: PathBuf,
    change_tx: Option<UnboundedSender<LocalChange>>,
}

impl LocalStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            change_tx: None,
        }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("gitodo"))
            .ok_or(StoreError::DataDirNotFound)
    }

    /// Initialize storage directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.base_path.join("files"))?;
        Ok(())
    }

    /// Register the channel that receives a notification whenever a
    /// file's task list is persisted.
    pub fn set_change_notifier(&mut self, tx: UnboundedSender<LocalChange>) {
        self.change_tx = Some(tx);
    }

    fn workspace_path(&self) -> PathBuf {
        self.base_path.join("workspace.json")
    }

    fn document_path(&self, file_path: &str) -> PathBuf {
        // Slashes are replaced so the virtual path maps onto one flat
        // file name, matching the storage-key scheme.
        let key = file_path.replace('/', "_");
        self.base_path.join("files").join(format!("{}.json", key))
    }

    // ===== Workspace Operations =====

    /// Load the workspace document. Malformed data resets to the default
    /// workspace rather than propagating an error.
    pub fn workspace(&self) -> Result<Workspace> {
        let path = self.workspace_path();
        if !path.exists() {
            return Ok(Workspace::default());
        }

        let content = fs::read_to_string(&path)?;
        let mut workspace: Workspace = match serde_json::from_str(&content) {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("Malformed workspace document, resetting to default: {}", e);
                let ws = Workspace::default();
                self.save_workspace(&ws)?;
                return Ok(ws);
            }
        };

        workspace.ensure_default_file();
        Ok(workspace)
    }

    pub fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;
        let content = serde_json::to_string_pretty(workspace)?;
        fs::write(self.workspace_path(), content)?;
        Ok(())
    }

    /// Path of the file currently displayed and synced.
    pub fn active_file(&self) -> Result<String> {
        Ok(self.workspace()?.active_path)
    }

    pub fn set_active_file(&self, file_path: &str) -> Result<()> {
        validate_virtual_path(file_path)?;
        let mut workspace = self.workspace()?;
        workspace.active_path = file_path.to_string();
        self.save_workspace(&workspace)?;
        log::info!("Active file set to {}", file_path);
        Ok(())
    }

    pub fn sync_enabled(&self) -> Result<bool> {
        Ok(self.workspace()?.sync_enabled)
    }

    pub fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        let mut workspace = self.workspace()?;
        workspace.sync_enabled = enabled;
        self.save_workspace(&workspace)?;
        log::info!("Git sync {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn known_files(&self) -> Result<Vec<FileDescriptor>> {
        Ok(self.workspace()?.files)
    }

    pub fn add_known_file(&self, name: &str, file_path: &str) -> Result<()> {
        validate_virtual_path(file_path)?;
        let mut workspace = self.workspace()?;
        if workspace.files.iter().any(|f| f.path == file_path) {
            return Err(StoreError::FileExists(file_path.to_string()));
        }
        workspace.files.push(FileDescriptor {
            name: name.to_string(),
            path: file_path.to_string(),
        });
        self.save_workspace(&workspace)
    }

    /// Rename a known file, moving its task document and timestamps with
    /// it. The active pointer follows the rename.
    pub fn rename_known_file(&self, old_path: &str, new_name: &str, new_path: &str) -> Result<()> {
        if old_path == DEFAULT_FILE_PATH {
            return Err(StoreError::DefaultFileProtected);
        }
        validate_virtual_path(new_path)?;

        let mut workspace = self.workspace()?;
        let index = workspace
            .files
            .iter()
            .position(|f| f.path == old_path)
            .ok_or_else(|| StoreError::FileNotFound(old_path.to_string()))?;
        if workspace.files.iter().any(|f| f.path == new_path) {
            return Err(StoreError::FileExists(new_path.to_string()));
        }

        let old_doc = self.document_path(old_path);
        if old_doc.exists() {
            fs::rename(&old_doc, self.document_path(new_path))?;
        }

        workspace.files[index].name = new_name.to_string();
        workspace.files[index].path = new_path.to_string();
        if workspace.active_path == old_path {
            workspace.active_path = new_path.to_string();
        }
        self.save_workspace(&workspace)?;
        log::info!("Renamed file {} -> {}", old_path, new_path);
        Ok(())
    }

    /// Remove a known file and its stored data. Removing the active file
    /// falls back to the default file.
    pub fn remove_known_file(&self, file_path: &str) -> Result<()> {
        if file_path == DEFAULT_FILE_PATH {
            return Err(StoreError::DefaultFileProtected);
        }

        let mut workspace = self.workspace()?;
        let before = workspace.files.len();
        workspace.files.retain(|f| f.path != file_path);
        if workspace.files.len() == before {
            return Err(StoreError::FileNotFound(file_path.to_string()));
        }
        if workspace.active_path == file_path {
            workspace.active_path = DEFAULT_FILE_PATH.to_string();
            log::info!("Removed active file {}, switched to default", file_path);
        }
        self.save_workspace(&workspace)?;

        let doc = self.document_path(file_path);
        if doc.exists() {
            fs::remove_file(doc)?;
        }
        Ok(())
    }

    // ===== Task Operations (Per-File) =====

    /// Load the per-file document. A missing document is an empty one;
    /// malformed data resets the file's records to empty with a logged
    /// warning, never an error.
    fn document(&self, file_path: &str) -> Result<FileDocument> {
        let path = self.document_path(file_path);
        if !path.exists() {
            return Ok(FileDocument::default());
        }

        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                log::warn!(
                    "Malformed task data for {}, resetting to empty: {}",
                    file_path,
                    e
                );
                Ok(FileDocument::default())
            }
        }
    }

    fn save_document(&self, file_path: &str, doc: &FileDocument) -> Result<()> {
        let path = self.document_path(file_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn tasks(&self, file_path: &str) -> Result<Vec<TaskRecord>> {
        Ok(self.document(file_path)?.tasks)
    }

    /// Persist a file's task list, bump its local-modification timestamp
    /// and broadcast the change notification.
    pub fn save_tasks(&self, file_path: &str, tasks: Vec<TaskRecord>) -> Result<()> {
        let mut doc = self.document(file_path)?;
        doc.tasks = tasks;
        doc.last_modified_local = Some(chrono::Utc::now());
        self.save_document(file_path, &doc)?;
        self.notify_change(file_path);
        Ok(())
    }

    pub fn add_task(&self, file_path: &str, text: &str) -> Result<TaskRecord> {
        let mut tasks = self.tasks(file_path)?;
        let record = TaskRecord::new(text);
        tasks.push(record.clone());
        self.save_tasks(file_path, tasks)?;
        Ok(record)
    }

    pub fn update_task(&self, file_path: &str, id: Uuid, text: &str) -> Result<()> {
        let mut tasks = self.tasks(file_path)?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::TaskNotFound(id))?;
        task.text = text.to_string();
        self.save_tasks(file_path, tasks)
    }

    pub fn remove_task(&self, file_path: &str, id: Uuid) -> Result<()> {
        let mut tasks = self.tasks(file_path)?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(StoreError::TaskNotFound(id));
        }
        self.save_tasks(file_path, tasks)
    }

    /// Overwrite a file's records with remote content, assigning fresh
    /// ids. Used when the remote side wins a sync run; deliberately does
    /// NOT broadcast a change notification, so applying remote state
    /// cannot re-trigger the sync cycle that produced it.
    pub fn apply_remote_content(&self, file_path: &str, content: &str) -> Result<Vec<TaskRecord>> {
        let tasks = content_to_tasks(content);
        let mut doc = self.document(file_path)?;
        doc.tasks = tasks.clone();
        doc.last_modified_local = Some(chrono::Utc::now());
        self.save_document(file_path, &doc)?;
        log::info!(
            "Applied remote content to {} ({} tasks)",
            file_path,
            tasks.len()
        );
        Ok(tasks)
    }

    /// Record a successful sync: timestamp plus the remote commit hash
    /// the file now corresponds to.
    pub fn mark_synced(&self, file_path: &str, remote_commit: Option<String>) -> Result<()> {
        let mut doc = self.document(file_path)?;
        doc.last_sync = Some(chrono::Utc::now());
        if remote_commit.is_some() {
            doc.last_remote_commit = remote_commit;
        }
        self.save_document(file_path, &doc)
    }

    pub fn last_sync(&self, file_path: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(self.document(file_path)?.last_sync)
    }

    pub fn last_modified_local(
        &self,
        file_path: &str,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(self.document(file_path)?.last_modified_local)
    }

    fn notify_change(&self, file_path: &str) {
        if let Some(tx) = &self.change_tx {
            let _ = tx.send(LocalChange {
                file_path: file_path.to_string(),
            });
        }
    }
}

fn validate_virtual_path(file_path: &str) -> Result<()> {
    if !file_path.starts_with('/') || file_path.len() < 2 || file_path.contains("..") {
        return Err(StoreError::InvalidPath(file_path.to_string()));
    }
    Ok(())
}
