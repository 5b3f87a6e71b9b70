use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::storage::{tasks_to_content, LocalStore, StoreError};

use super::config::{RenderCallback, StatusObserver, SyncState, SyncStatus};
use super::gateway::RemoteStore;
use super::monitor::Connectivity;
use super::pending::PendingTracker;

/// Decides, for every trigger (local change, reconnect, manual request,
/// startup), whether the active file should be pushed, pulled or left
/// alone, and keeps the pending-commit flag truthful across the run.
///
/// The decision tree per run, after the preconditions pass:
/// - remote read fails: report an error, touch nothing;
/// - remote file absent: first-time publish of the local content;
/// - contents equal: already in sync, clear the pending flag;
/// - contents differ with a pending local change: local wins, push;
/// - contents differ with no pending change: remote wins, pull.
///
/// One remote read per run, at most one remote write, and exactly one
/// final status report whatever branch the run takes.
pub struct SyncCoordinator {
    store: Arc<Mutex<LocalStore>>,
    pending: Arc<PendingTracker>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    observer: StatusObserver,
    render: Option<RenderCallback>,
    /// Single-slot guard: a trigger arriving while a run is in flight
    /// queues exactly one follow-up run instead of overlapping.
    run_in_flight: AtomicBool,
    run_again: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<Mutex<LocalStore>>,
        pending: Arc<PendingTracker>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        observer: StatusObserver,
    ) -> Self {
        Self {
            store,
            pending,
            remote,
            connectivity,
            observer,
            render: None,
            run_in_flight: AtomicBool::new(false),
            run_again: AtomicBool::new(false),
        }
    }

    /// Register the callback that refreshes the rendered task list after
    /// a run overwrites local records with remote content.
    pub fn with_render_callback(mut self, render: RenderCallback) -> Self {
        self.render = Some(render);
        self
    }

    /// Run a coordination cycle, coalescing overlapping triggers: if a
    /// run is already in flight this queues one follow-up run and
    /// returns immediately.
    pub async fn coordinate(&self) {
        if self.run_in_flight.swap(true, Ordering::SeqCst) {
            self.run_again.store(true, Ordering::SeqCst);
            log::debug!("Sync run already in flight, queued a follow-up run");
            return;
        }

        self.run_once().await;
        while self.run_again.swap(false, Ordering::SeqCst) {
            log::debug!("Running queued follow-up sync");
            self.run_once().await;
        }
        self.run_in_flight.store(false, Ordering::SeqCst);
    }

    async fn run_once(&self) {
        let enabled = {
            let store = self.store.lock().unwrap();
            store.sync_enabled()
        };
        match enabled {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Git sync is disabled, skipping sync");
                self.report(SyncState::Disabled, "", None);
                return;
            }
            Err(e) => {
                log::error!("Sync failed: could not read workspace: {}", e);
                self.report(SyncState::Error, "No active file", None);
                return;
            }
        }

        let active = {
            let store = self.store.lock().unwrap();
            store.active_file()
        };
        let active = match active {
            Ok(path) => path,
            Err(e) => {
                log::error!("Sync failed: could not determine active file path: {}", e);
                self.report(SyncState::Error, "No active file", None);
                return;
            }
        };

        if !self.connectivity.is_online() {
            log::warn!("Cannot sync, application is offline");
            self.report(SyncState::Offline, "", Some(&active));
            return;
        }

        log::debug!("Starting coordinated sync for active file: {}", active);
        self.report(SyncState::Syncing, "", Some(&active));

        // The outer match is the finally: whichever branch `execute`
        // takes, the run ends with exactly one final report.
        let (state, message) = match self.execute(&active).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Error during sync for {}: {}", active, e);
                (SyncState::Error, e.to_string())
            }
        };
        self.report(state, &message, Some(&active));
    }

    /// The network phase of a run. Gateway failures are resolved to
    /// error outcomes here; only local-store failures bubble up.
    async fn execute(&self, active: &str) -> Result<(SyncState, String), StoreError> {
        let local_content = {
            let store = self.store.lock().unwrap();
            tasks_to_content(&store.tasks(active)?)
        };
        let name = active.trim_start_matches('/');

        let remote = match self.remote.read(name).await {
            Ok(remote) => remote,
            Err(e) => {
                log::error!("Failed to read file from Git: {}: {}", name, e);
                return Ok((SyncState::Error, "Failed to read from Git".to_string()));
            }
        };

        if !remote.found {
            log::info!("File {} not in Git repository, creating initial commit", name);
            let message = format!("Initial commit: {}", name);
            return match self.remote.write(name, &local_content, &message).await {
                Ok(commit) => {
                    self.finish_in_sync(active, Some(commit.hash))?;
                    Ok((SyncState::Idle, String::new()))
                }
                Err(e) => {
                    log::error!("Initial commit failed for {}: {}", name, e);
                    Ok((SyncState::Error, "Failed initial commit".to_string()))
                }
            };
        }

        let remote_content = remote.content.unwrap_or_default();
        let remote_hash = remote.last_commit.map(|c| c.hash);

        if remote_content == local_content {
            log::debug!("File {} is in sync with Git", name);
            self.finish_in_sync(active, remote_hash)?;
            return Ok((SyncState::Idle, String::new()));
        }

        if self.pending.is_pending(active) {
            // Local wins unconditionally: an uncommitted local change
            // overwrites the remote copy whatever the divergence is.
            log::info!("Pending changes detected for {}, committing local version", name);
            let message = format!("Update {}", name);
            return match self.remote.write(name, &local_content, &message).await {
                Ok(commit) => {
                    self.finish_in_sync(active, Some(commit.hash))?;
                    Ok((SyncState::Idle, String::new()))
                }
                Err(e) => {
                    // The flag stays set so the next trigger retries.
                    log::error!("Failed to commit local changes for {}: {}", name, e);
                    Ok((SyncState::Error, "Failed to commit changes".to_string()))
                }
            };
        }

        // Remote wins: no local change on record, take the Git version.
        log::info!("Git version differs from local for {}, pulling Git version", name);
        {
            let store = self.store.lock().unwrap();
            store.apply_remote_content(active, &remote_content)?;
        }
        if let Some(render) = &self.render {
            render(active);
        }
        self.finish_in_sync(active, remote_hash)?;
        Ok((SyncState::Idle, String::new()))
    }

    /// Local and remote are now known equal: drop the dirty mark and
    /// record the sync point.
    fn finish_in_sync(&self, active: &str, remote_commit: Option<String>) -> Result<(), StoreError> {
        self.pending.clear_pending(active);
        let store = self.store.lock().unwrap();
        store.mark_synced(active, remote_commit)
    }

    fn report(&self, state: SyncState, message: &str, file_path: Option<&str>) {
        (self.observer)(SyncStatus::new(state, message, file_path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use tempfile::TempDir;

    use crate::git::{
        CommitInfo, GitConfig, GitConfigUpdate, RemoteFileInfo, RemoteSyncOutcome, RepoStatus,
    };
    use crate::storage::{content_to_tasks, DEFAULT_FILE_PATH};
    use crate::sync::gateway::{GatewayError, RemoteFileResult};

    fn commit(hash: &str) -> CommitInfo {
        CommitInfo {
            hash: hash.to_string(),
            message: String::new(),
            date: Utc::now(),
            author: "Test User".to_string(),
            email: "test@local".to_string(),
        }
    }

    /// In-memory remote with switchable failure modes and call counts.
    #[derive(Default)]
    struct MockRemote {
        content: Mutex<Option<String>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        reads: AtomicUsize,
        writes: Mutex<Vec<(String, String, String)>>,
    }

    impl MockRemote {
        fn with_content(content: &str) -> Self {
            Self {
                content: Mutex::new(Some(content.to_string())),
                ..Default::default()
            }
        }

        fn remote_content(&self) -> Option<String> {
            self.content.lock().unwrap().clone()
        }

        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RemoteStore for MockRemote {
        async fn read(&self, _name: &str) -> Result<RemoteFileResult, GatewayError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(GatewayError::Server {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(match self.remote_content() {
                Some(content) => RemoteFileResult {
                    found: true,
                    content: Some(content),
                    last_commit: Some(commit("remotehash")),
                },
                None => RemoteFileResult::absent(),
            })
        }

        async fn write(
            &self,
            name: &str,
            content: &str,
            commit_message: &str,
        ) -> Result<CommitInfo, GatewayError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(GatewayError::Server {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            *self.content.lock().unwrap() = Some(content.to_string());
            self.writes.lock().unwrap().push((
                name.to_string(),
                content.to_string(),
                commit_message.to_string(),
            ));
            Ok(commit("newhash"))
        }

        async fn rename(&self, _: &str, _: &str) -> Result<CommitInfo, GatewayError> {
            unimplemented!()
        }
        async fn delete(&self, _: &str) -> Result<CommitInfo, GatewayError> {
            unimplemented!()
        }
        async fn list_all(&self) -> Result<Vec<RemoteFileInfo>, GatewayError> {
            Ok(Vec::new())
        }
        async fn status(&self) -> Result<RepoStatus, GatewayError> {
            unimplemented!()
        }
        async fn history(&self, _: &str, _: usize) -> Result<Vec<CommitInfo>, GatewayError> {
            unimplemented!()
        }
        async fn get_config(&self) -> Result<(GitConfig, Option<String>), GatewayError> {
            unimplemented!()
        }
        async fn update_config(&self, _: GitConfigUpdate) -> Result<GitConfig, GatewayError> {
            unimplemented!()
        }
        async fn remote_sync(&self) -> Result<RemoteSyncOutcome, GatewayError> {
            unimplemented!()
        }
    }

    struct Harness {
        _temp: TempDir,
        store: Arc<Mutex<LocalStore>>,
        pending: Arc<PendingTracker>,
        remote: Arc<MockRemote>,
        connectivity: Connectivity,
        statuses: Arc<Mutex<Vec<SyncStatus>>>,
        rendered: Arc<Mutex<Vec<String>>>,
        coordinator: SyncCoordinator,
    }

    fn harness(remote: MockRemote) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().to_path_buf());
        store.init().unwrap();
        store.set_sync_enabled(true).unwrap();
        let store = Arc::new(Mutex::new(store));

        let pending = Arc::new(PendingTracker::load(temp.path()));
        let remote = Arc::new(remote);
        let connectivity = Connectivity::new(true);

        let statuses: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();
        let observer: StatusObserver = {
            let statuses = Arc::clone(&statuses);
            Arc::new(move |status| statuses.lock().unwrap().push(status))
        };

        let rendered: Arc<Mutex<Vec<String>>> = Arc::default();
        let render: RenderCallback = {
            let rendered = Arc::clone(&rendered);
            Arc::new(move |path: &str| rendered.lock().unwrap().push(path.to_string()))
        };

        let coordinator = SyncCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            connectivity.clone(),
            observer,
        )
        .with_render_callback(render);

        Harness {
            _temp: temp,
            store,
            pending,
            remote,
            connectivity,
            statuses,
            rendered,
            coordinator,
        }
    }

    fn set_local_content(h: &Harness, content: &str) {
        let store = h.store.lock().unwrap();
        store
            .save_tasks(DEFAULT_FILE_PATH, content_to_tasks(content))
            .unwrap();
    }

    fn local_content(h: &Harness) -> String {
        let store = h.store.lock().unwrap();
        tasks_to_content(&store.tasks(DEFAULT_FILE_PATH).unwrap())
    }

    fn last_state(h: &Harness) -> SyncState {
        h.statuses.lock().unwrap().last().unwrap().state
    }

    #[tokio::test]
    async fn test_first_publish_creates_remote_file() {
        // Scenario: local has content, remote file absent.
        let h = harness(MockRemote::default());
        set_local_content(&h, "Buy milk");
        h.pending.set_pending(DEFAULT_FILE_PATH);

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.remote_content().as_deref(), Some("Buy milk"));
        let writes = h.remote.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "todo.txt");
        assert_eq!(writes[0].2, "Initial commit: todo.txt");
        drop(writes);
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(last_state(&h), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_equal_content_skips_write() {
        // Scenario: both sides hold "A\nB", no pending flag.
        let h = harness(MockRemote::with_content("A\nB"));
        set_local_content(&h, "A\nB");

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.write_count(), 0);
        assert_eq!(last_state(&h), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_local_wins_when_pending() {
        // Scenario: remote "A\nB", local "A\nC", pending set.
        let h = harness(MockRemote::with_content("A\nB"));
        set_local_content(&h, "A\nC");
        h.pending.set_pending(DEFAULT_FILE_PATH);

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.remote_content().as_deref(), Some("A\nC"));
        let writes = h.remote.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2, "Update todo.txt");
        drop(writes);
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(last_state(&h), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_remote_wins_without_pending() {
        // Scenario: remote "A\nB", local "A\nC", no pending flag.
        let h = harness(MockRemote::with_content("A\nB"));
        set_local_content(&h, "A\nC");

        h.coordinator.coordinate().await;

        let tasks = h.store.lock().unwrap().tasks(DEFAULT_FILE_PATH).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].text, "A");
        assert_eq!(tasks[1].text, "B");
        assert_eq!(h.remote.write_count(), 0);
        assert_eq!(last_state(&h), SyncState::Idle);
        assert_eq!(
            *h.rendered.lock().unwrap(),
            vec![DEFAULT_FILE_PATH.to_string()],
            "render callback fires after the pull"
        );
    }

    #[tokio::test]
    async fn test_read_failure_reports_error_and_preserves_flag() {
        // Scenario: remote read blows up mid-run.
        let h = harness(MockRemote::with_content("A"));
        set_local_content(&h, "B");
        h.pending.set_pending(DEFAULT_FILE_PATH);
        h.remote.fail_reads.store(true, Ordering::SeqCst);

        h.coordinator.coordinate().await;

        let statuses = h.statuses.lock().unwrap();
        let last = statuses.last().unwrap();
        assert_eq!(last.state, SyncState::Error);
        assert_eq!(last.message, "Failed to read from Git");
        drop(statuses);
        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(h.remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_flag_for_retry() {
        let h = harness(MockRemote::with_content("A"));
        set_local_content(&h, "B");
        h.pending.set_pending(DEFAULT_FILE_PATH);
        h.remote.fail_writes.store(true, Ordering::SeqCst);

        h.coordinator.coordinate().await;
        assert_eq!(last_state(&h), SyncState::Error);
        assert_eq!(
            h.statuses.lock().unwrap().last().unwrap().message,
            "Failed to commit changes"
        );
        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));

        // Next trigger retries and succeeds.
        h.remote.fail_writes.store(false, Ordering::SeqCst);
        h.coordinator.coordinate().await;
        assert_eq!(h.remote.remote_content().as_deref(), Some("B"));
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(last_state(&h), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_failed_initial_commit_reports_error() {
        let h = harness(MockRemote::default());
        set_local_content(&h, "Buy milk");
        h.remote.fail_writes.store(true, Ordering::SeqCst);

        h.coordinator.coordinate().await;

        assert_eq!(last_state(&h), SyncState::Error);
        assert_eq!(
            h.statuses.lock().unwrap().last().unwrap().message,
            "Failed initial commit"
        );
    }

    #[tokio::test]
    async fn test_idempotent_runs_write_once() {
        let h = harness(MockRemote::with_content("A\nB"));
        set_local_content(&h, "A\nC");
        h.pending.set_pending(DEFAULT_FILE_PATH);

        h.coordinator.coordinate().await;
        h.coordinator.coordinate().await;

        assert_eq!(h.remote.write_count(), 1, "second run finds content equal");
        assert_eq!(h.remote.read_count(), 2);
        assert_eq!(last_state(&h), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_short_circuits_without_network() {
        let h = harness(MockRemote::with_content("A"));
        h.store.lock().unwrap().set_sync_enabled(false).unwrap();

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.read_count(), 0);
        let statuses = h.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1, "no syncing report for a skipped run");
        assert_eq!(statuses[0].state, SyncState::Disabled);
        assert_eq!(statuses[0].file_path, None);
    }

    #[tokio::test]
    async fn test_offline_short_circuits_and_preserves_flag() {
        let h = harness(MockRemote::with_content("A"));
        set_local_content(&h, "B");
        h.pending.set_pending(DEFAULT_FILE_PATH);
        h.connectivity.set_online(false);

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.read_count(), 0);
        assert_eq!(last_state(&h), SyncState::Offline);
        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));
    }

    #[tokio::test]
    async fn test_run_reports_syncing_then_final() {
        let h = harness(MockRemote::with_content("A"));
        set_local_content(&h, "A");

        h.coordinator.coordinate().await;

        let states: Vec<SyncState> =
            h.statuses.lock().unwrap().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![SyncState::Syncing, SyncState::Idle]);
    }

    #[tokio::test]
    async fn test_sync_point_recorded_after_success() {
        let h = harness(MockRemote::with_content("A"));
        set_local_content(&h, "A");
        assert!(h
            .store
            .lock()
            .unwrap()
            .last_sync(DEFAULT_FILE_PATH)
            .unwrap()
            .is_none());

        h.coordinator.coordinate().await;

        assert!(h
            .store
            .lock()
            .unwrap()
            .last_sync(DEFAULT_FILE_PATH)
            .unwrap()
            .is_some());
        assert_eq!(local_content(&h), "A");
    }

    #[tokio::test]
    async fn test_no_op_edit_with_pending_flag_clears_on_equal_content() {
        // The dirty flag was set but the content already matches the
        // remote (e.g. an edit that was undone).
        let h = harness(MockRemote::with_content("A\nB"));
        set_local_content(&h, "A\nB");
        h.pending.set_pending(DEFAULT_FILE_PATH);

        h.coordinator.coordinate().await;

        assert_eq!(h.remote.write_count(), 0);
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(last_state(&h), SyncState::Idle);
    }
}
