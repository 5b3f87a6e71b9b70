//! High-level Git backend for the todo file server.
//!
//! Owns the data directory (a git repository of todo.txt files) and the
//! config directory (git identity, remote URL, SSH keys). Every file
//! mutation produces exactly one commit.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::repository::{self, CommitInfo, GitOperationError, MergeOutcome, RepoStatus};

#[derive(Error, Debug)]
pub enum GitBackendError {
    #[error("{0}")]
    Git(#[from] GitOperationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ENOENT: no such file '{0}'")]
    FileNotFound(String),

    #[error("Invalid filename: {0}")]
    InvalidName(String),

    #[error("No remote URL configured")]
    NoRemote,
}

pub type Result<T> = std::result::Result<T, GitBackendError>;

/// Git identity and remote configuration, persisted as `config.json` in
/// the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    pub user_name: String,
    pub user_email: String,
    pub remote_url: Option<String>,
    pub remote_name: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            user_name: "Todo.txt User".to_string(),
            user_email: "todo@localhost".to_string(),
            remote_url: None,
            remote_name: "origin".to_string(),
        }
    }
}

/// Partial config update, merged over the stored config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

/// A todo file as listed by the files endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub last_commit: Option<CommitInfo>,
}

/// Result of an explicit fetch/merge/push cycle against the configured
/// remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

pub struct GitBackend {
    data_dir: PathBuf,
    config_dir: PathBuf,
    config: Mutex<GitConfig>,
    /// git2 index operations are not safe to interleave; every mutating
    /// repository operation holds this guard.
    repo_guard: Mutex<()>,
}

impl GitBackend {
    pub fn new(data_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            data_dir,
            config_dir,
            config: Mutex::new(GitConfig::default()),
            repo_guard: Mutex::new(()),
        }
    }

    /// Default config directory (`~/.config/gitodo` on Linux).
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitodo"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    fn ssh_key_path(&self) -> PathBuf {
        self.config_dir.join("id_ed25519")
    }

    fn ssh_pub_key_path(&self) -> PathBuf {
        self.config_dir.join("id_ed25519.pub")
    }

    /// Initialize the backend: directories, config, repository seed
    /// files and SSH keys. Idempotent.
    pub fn init(&self) -> Result<()> {
        log::info!(
            "Initializing Git backend (data: {:?}, config: {:?})",
            self.data_dir,
            self.config_dir
        );
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.config_dir)?;

        self.load_config()?;

        if !repository::is_git_repo(&self.data_dir) {
            let (name, email) = self.identity();
            repository::init_repo(&self.data_dir)?;
            repository::set_identity(&self.data_dir, &name, &email)?;

            let gitignore = self.data_dir.join(".gitignore");
            if !gitignore.exists() {
                fs::write(&gitignore, "*.swp\n*.tmp\n.DS_Store\n")?;
            }

            let readme = self.data_dir.join("README.md");
            if !readme.exists() {
                fs::write(
                    &readme,
                    "# Todo.txt Files\n\nThis repository contains your todo.txt files synced via Git.\n",
                )?;
                let _guard = self.repo_guard.lock().unwrap();
                repository::commit_file(&self.data_dir, "README.md", "Initial commit", &name, &email)?;
            }
        } else {
            log::info!("Git repository already exists at {:?}", self.data_dir);
        }

        self.ensure_ssh_keys();
        log::info!("Git backend initialization complete");
        Ok(())
    }

    // ===== Config =====

    fn load_config(&self) -> Result<()> {
        let path = self.config_path();
        let config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Malformed git config, using defaults: {}", e);
                GitConfig::default()
            })
        } else {
            log::info!("No existing Git config found, creating default config");
            let config = GitConfig::default();
            self.save_config(&config)?;
            config
        };
        *self.config.lock().unwrap() = config;
        Ok(())
    }

    fn save_config(&self, config: &GitConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        fs::write(self.config_path(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    fn identity(&self) -> (String, String) {
        let config = self.config.lock().unwrap();
        (config.user_name.clone(), config.user_email.clone())
    }

    pub fn get_config(&self) -> GitConfig {
        self.config.lock().unwrap().clone()
    }

    /// Merge a partial update into the stored config and apply the
    /// identity to the repository.
    pub fn update_config(&self, update: GitConfigUpdate) -> Result<GitConfig> {
        let merged = {
            let mut config = self.config.lock().unwrap();
            if let Some(user_name) = update.user_name {
                config.user_name = user_name;
            }
            if let Some(user_email) = update.user_email {
                config.user_email = user_email;
            }
            if let Some(remote_url) = update.remote_url {
                config.remote_url = if remote_url.is_empty() {
                    None
                } else {
                    Some(remote_url)
                };
            }
            config.clone()
        };
        self.save_config(&merged)?;

        if repository::is_git_repo(&self.data_dir) {
            repository::set_identity(&self.data_dir, &merged.user_name, &merged.user_email)?;
        }

        Ok(merged)
    }

    // ===== SSH keys =====

    /// Generate an ed25519 keypair in the config directory if none
    /// exists. Best-effort: a missing ssh-keygen only disables remote
    /// sync, not the backend.
    fn ensure_ssh_keys(&self) {
        let key = self.ssh_key_path();
        if key.exists() && self.ssh_pub_key_path().exists() {
            log::info!("SSH keys already exist at {:?}", key);
            return;
        }

        log::info!("Generating new SSH key pair...");
        let result = Command::new("ssh-keygen")
            .args(["-t", "ed25519", "-N", "", "-C", "gitodo-sync", "-f"])
            .arg(&key)
            .output();

        match result {
            Ok(output) if output.status.success() => {
                log::info!("SSH keys generated at {:?}", key);
            }
            Ok(output) => {
                log::warn!(
                    "ssh-keygen failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => {
                log::warn!("Could not run ssh-keygen: {}", e);
            }
        }
    }

    pub fn public_key(&self) -> Option<String> {
        fs::read_to_string(self.ssh_pub_key_path())
            .ok()
            .map(|key| key.trim().to_string())
    }

    // ===== File operations =====

    pub fn list_files(&self) -> Result<Vec<RemoteFileInfo>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".txt") || !entry.file_type()?.is_file() {
                continue;
            }

            let metadata = entry.metadata()?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let last_commit = repository::last_commit_for(&self.data_dir, &name)
                .map_err(|e| {
                    log::error!("Error getting git log for {}: {}", name, e);
                    e
                })
                .unwrap_or(None);

            files.push(RemoteFileInfo {
                path: format!("/{}", name),
                name,
                size: metadata.len(),
                modified,
                last_commit,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn read_file(&self, name: &str) -> Result<(String, Option<CommitInfo>)> {
        validate_filename(name)?;
        let content = fs::read_to_string(self.data_dir.join(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitBackendError::FileNotFound(name.to_string())
            } else {
                GitBackendError::Io(e)
            }
        })?;
        let last_commit = repository::last_commit_for(&self.data_dir, name)?;
        Ok((content, last_commit))
    }

    pub fn write_file(
        &self,
        name: &str,
        content: &str,
        commit_message: Option<&str>,
    ) -> Result<CommitInfo> {
        validate_filename(name)?;
        let (user, email) = self.identity();
        let message = match commit_message {
            Some(m) => m.to_string(),
            None => format!("Update {} - {}", name, Utc::now().to_rfc3339()),
        };

        let _guard = self.repo_guard.lock().unwrap();
        fs::write(self.data_dir.join(name), content)?;
        let commit = repository::commit_file(&self.data_dir, name, &message, &user, &email)?;
        log::info!("Committed {}: {} - {}", name, &commit.hash[..7], message);
        Ok(commit)
    }

    pub fn rename_file(&self, old_name: &str, new_name: &str) -> Result<CommitInfo> {
        validate_filename(old_name)?;
        validate_filename(new_name)?;
        let (user, email) = self.identity();

        let _guard = self.repo_guard.lock().unwrap();
        let old_path = self.data_dir.join(old_name);
        if !old_path.exists() {
            return Err(GitBackendError::FileNotFound(old_name.to_string()));
        }
        fs::rename(old_path, self.data_dir.join(new_name))?;
        let message = format!("Rename {} to {}", old_name, new_name);
        let commit =
            repository::commit_rename(&self.data_dir, old_name, new_name, &message, &user, &email)?;
        log::info!("Renamed file: {} -> {}", old_name, new_name);
        Ok(commit)
    }

    pub fn delete_file(&self, name: &str) -> Result<CommitInfo> {
        validate_filename(name)?;
        let (user, email) = self.identity();

        let _guard = self.repo_guard.lock().unwrap();
        fs::remove_file(self.data_dir.join(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitBackendError::FileNotFound(name.to_string())
            } else {
                GitBackendError::Io(e)
            }
        })?;
        let message = format!("Delete {}", name);
        let commit = repository::commit_removal(&self.data_dir, name, &message, &user, &email)?;
        log::info!("Deleted file: {}", name);
        Ok(commit)
    }

    pub fn file_history(&self, name: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        validate_filename(name)?;
        Ok(repository::file_history(&self.data_dir, name, limit)?)
    }

    pub fn status(&self) -> Result<RepoStatus> {
        Ok(repository::get_status(&self.data_dir)?)
    }

    // ===== Remote sync =====

    /// Fetch from the configured remote, merge the remote branch and
    /// push. Merge conflicts abort the cycle and are reported by path.
    pub fn sync_with_remote(&self) -> Result<RemoteSyncOutcome> {
        let config = self.get_config();
        let remote_url = config.remote_url.ok_or(GitBackendError::NoRemote)?;
        log::info!("Starting remote sync with {}", remote_url);

        let key_path = self.ssh_key_path();
        let ssh_key = key_path.exists().then_some(key_path.as_path());

        let _guard = self.repo_guard.lock().unwrap();
        repository::ensure_remote(&self.data_dir, &config.remote_name, &remote_url)?;
        repository::fetch(&self.data_dir, &config.remote_name, ssh_key)?;

        match repository::merge_remote(&self.data_dir, &config.user_name, &config.user_email)? {
            MergeOutcome::Conflicts(conflicts) => Ok(RemoteSyncOutcome {
                success: false,
                message: Some("Merge conflicts detected".to_string()),
                conflicts,
            }),
            _ => {
                repository::push(&self.data_dir, &config.remote_name, ssh_key)?;
                log::info!("Remote sync completed successfully");
                Ok(RemoteSyncOutcome {
                    success: true,
                    message: Some("Sync completed successfully".to_string()),
                    conflicts: Vec::new(),
                })
            }
        }
    }
}

/// Reject names that could escape the data directory.
fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name == "."
    {
        return Err(GitBackendError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_backend() -> (TempDir, GitBackend) {
        let temp = TempDir::new().unwrap();
        let backend = GitBackend::new(temp.path().join("data"), temp.path().join("config"));
        backend.init().unwrap();
        (temp, backend)
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_temp, backend) = create_backend();
        backend.init().unwrap();
        assert!(repository::is_git_repo(backend.data_dir()));
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_temp, backend) = create_backend();
        let commit = backend
            .write_file("todo.txt", "Buy milk", Some("Initial commit: todo.txt"))
            .unwrap();
        assert_eq!(commit.message, "Initial commit: todo.txt");

        let (content, last_commit) = backend.read_file("todo.txt").unwrap();
        assert_eq!(content, "Buy milk");
        assert_eq!(last_commit.unwrap().hash, commit.hash);
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let (_temp, backend) = create_backend();
        let err = backend.read_file("missing.txt").unwrap_err();
        assert!(matches!(err, GitBackendError::FileNotFound(_)));
        assert!(err.to_string().contains("ENOENT"));
    }

    #[test]
    fn test_default_commit_message_is_timestamped() {
        let (_temp, backend) = create_backend();
        let commit = backend.write_file("todo.txt", "Task", None).unwrap();
        assert!(commit.message.starts_with("Update todo.txt - "));
    }

    #[test]
    fn test_list_files_only_txt() {
        let (_temp, backend) = create_backend();
        backend.write_file("todo.txt", "a", None).unwrap();
        backend.write_file("work.txt", "b", None).unwrap();

        let files = backend.list_files().unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["todo.txt", "work.txt"]);
        assert_eq!(files[0].path, "/todo.txt");
        assert!(files[0].last_commit.is_some());
    }

    #[test]
    fn test_rename_and_delete() {
        let (_temp, backend) = create_backend();
        backend.write_file("todo.txt", "a", None).unwrap();

        let commit = backend.rename_file("todo.txt", "renamed.txt").unwrap();
        assert_eq!(commit.message, "Rename todo.txt to renamed.txt");
        assert!(backend.read_file("renamed.txt").is_ok());
        assert!(backend.read_file("todo.txt").is_err());

        let commit = backend.delete_file("renamed.txt").unwrap();
        assert_eq!(commit.message, "Delete renamed.txt");
        assert!(backend.read_file("renamed.txt").is_err());
    }

    #[test]
    fn test_invalid_filenames_rejected() {
        let (_temp, backend) = create_backend();
        for name in ["../escape.txt", "a/b.txt", "", "."] {
            assert!(matches!(
                backend.write_file(name, "x", None),
                Err(GitBackendError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_config_merge_update() {
        let (_temp, backend) = create_backend();
        let config = backend
            .update_config(GitConfigUpdate {
                user_name: Some("Alice".to_string()),
                user_email: None,
                remote_url: Some("git@example.com:todos.git".to_string()),
            })
            .unwrap();
        assert_eq!(config.user_name, "Alice");
        assert_eq!(config.user_email, "todo@localhost");
        assert_eq!(config.remote_url.as_deref(), Some("git@example.com:todos.git"));

        // Persisted across a reload.
        backend.load_config().unwrap();
        assert_eq!(backend.get_config().user_name, "Alice");
    }

    #[test]
    fn test_sync_without_remote_fails() {
        let (_temp, backend) = create_backend();
        assert!(matches!(
            backend.sync_with_remote(),
            Err(GitBackendError::NoRemote)
        ));
    }

    #[test]
    fn test_history_through_backend() {
        let (_temp, backend) = create_backend();
        backend
            .write_file("todo.txt", "v1", Some("Initial commit: todo.txt"))
            .unwrap();
        backend
            .write_file("todo.txt", "v2", Some("Update todo.txt"))
            .unwrap();

        let history = backend.file_history("todo.txt", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "Update todo.txt");
    }
}
