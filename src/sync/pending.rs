use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable per-file "local change not yet committed remotely" flags.
///
/// Pure state storage keyed by file path, independent of network
/// reachability: set synchronously on local mutation, cleared only after
/// a verified remote commit or once remote content is confirmed
/// identical to local. Persisted as `pending_commits.json` so the dirty
/// mark survives restarts and offline periods; persistence failures are
/// logged, never propagated.
pub struct PendingTracker {
    path: PathBuf,
    paths: Mutex<BTreeSet<String>>,
}

impl PendingTracker {
    /// Load the tracker state from the data directory. Malformed data
    /// resets to no pending flags with a logged warning.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("pending_commits.json");
        let paths = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeSet<String>>(&content) {
                Ok(paths) => paths,
                Err(e) => {
                    log::warn!("Malformed pending-commit data, resetting: {}", e);
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };

        Self {
            path,
            paths: Mutex::new(paths),
        }
    }

    /// Mark a file as having an uncommitted local change. Idempotent.
    pub fn set_pending(&self, file_path: &str) {
        let mut paths = self.paths.lock().unwrap();
        if paths.insert(file_path.to_string()) {
            log::debug!("Set pending commit flag for {}", file_path);
            self.persist(&paths);
        }
    }

    pub fn is_pending(&self, file_path: &str) -> bool {
        self.paths.lock().unwrap().contains(file_path)
    }

    /// Clear a file's dirty mark. Idempotent; no-op if absent.
    pub fn clear_pending(&self, file_path: &str) {
        let mut paths = self.paths.lock().unwrap();
        if paths.remove(file_path) {
            log::debug!("Cleared pending commit flag for {}", file_path);
            self.persist(&paths);
        }
    }

    fn persist(&self, paths: &BTreeSet<String>) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let content = match serde_json::to_string_pretty(paths) {
            Ok(content) => content,
            Err(e) => {
                log::error!("Failed to serialize pending-commit flags: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, content) {
            log::error!("Failed to persist pending-commit flags: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_clear() {
        let temp = TempDir::new().unwrap();
        let tracker = PendingTracker::load(temp.path());

        assert!(!tracker.is_pending("/todo.txt"));
        tracker.set_pending("/todo.txt");
        assert!(tracker.is_pending("/todo.txt"));
        assert!(!tracker.is_pending("/work.txt"));

        tracker.clear_pending("/todo.txt");
        assert!(!tracker.is_pending("/todo.txt"));
    }

    #[test]
    fn test_idempotent() {
        let temp = TempDir::new().unwrap();
        let tracker = PendingTracker::load(temp.path());

        tracker.set_pending("/todo.txt");
        tracker.set_pending("/todo.txt");
        assert!(tracker.is_pending("/todo.txt"));

        tracker.clear_pending("/todo.txt");
        tracker.clear_pending("/todo.txt");
        assert!(!tracker.is_pending("/todo.txt"));
    }

    #[test]
    fn test_survives_reload() {
        let temp = TempDir::new().unwrap();
        {
            let tracker = PendingTracker::load(temp.path());
            tracker.set_pending("/todo.txt");
        }
        let tracker = PendingTracker::load(temp.path());
        assert!(tracker.is_pending("/todo.txt"));
    }

    #[test]
    fn test_malformed_data_resets() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("pending_commits.json"), "{oops").unwrap();
        let tracker = PendingTracker::load(temp.path());
        assert!(!tracker.is_pending("/todo.txt"));
    }
}
