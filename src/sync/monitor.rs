use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::storage::{LocalChange, LocalStore, DEFAULT_FILE_PATH};

use super::config::{StatusObserver, SyncState, SyncStatus};
use super::coordinator::SyncCoordinator;
use super::pending::PendingTracker;

/// Quiet period after the last local edit before a sync run starts.
pub const SYNC_DEBOUNCE_DELAY: Duration = Duration::from_secs(3);

/// Shared online/offline state, the process's stand-in for the
/// browser's connectivity signal. The embedding application flips it
/// through [`SyncMonitor::set_online`].
#[derive(Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

/// Messages to control the sync monitor
#[derive(Debug)]
enum MonitorMessage {
    LocalChange { file_path: String },
    Online,
    Offline,
    SyncNow,
    Shutdown,
}

/// Handle for the connectivity and lifecycle monitor.
pub struct SyncMonitor {
    sender: mpsc::UnboundedSender<MonitorMessage>,
    connectivity: Connectivity,
}

impl SyncMonitor {
    /// Feed a local-change notification for a file. Changes to
    /// non-active files are ignored by the monitor loop.
    pub fn notify_local_change(&self, file_path: &str) {
        let _ = self.sender.send(MonitorMessage::LocalChange {
            file_path: file_path.to_string(),
        });
    }

    /// Record a connectivity transition and react to it.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
        let _ = self.sender.send(if online {
            MonitorMessage::Online
        } else {
            MonitorMessage::Offline
        });
    }

    /// Trigger an immediate coordination run, canceling any scheduled
    /// debounced run.
    pub fn request_sync(&self) {
        let _ = self.sender.send(MonitorMessage::SyncNow);
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(MonitorMessage::Shutdown);
    }
}

/// Start the monitor: compute and report the initial sync state, wire
/// the store's change notifications into the control loop and spawn it.
pub fn start_monitor(
    coordinator: Arc<SyncCoordinator>,
    store: Arc<Mutex<LocalStore>>,
    pending: Arc<PendingTracker>,
    connectivity: Connectivity,
    observer: StatusObserver,
) -> SyncMonitor {
    let (tx, rx) = mpsc::unbounded_channel();
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    store.lock().unwrap().set_change_notifier(change_tx);

    report_initial_state(&store, &pending, &connectivity, &observer);

    tokio::spawn(monitor_loop(
        coordinator,
        Arc::clone(&store),
        pending,
        connectivity.clone(),
        observer,
        rx,
        change_rx,
    ));

    SyncMonitor {
        sender: tx,
        connectivity,
    }
}

/// Deterministic startup state, no network call:
/// offline > disabled > pending > idle.
fn report_initial_state(
    store: &Arc<Mutex<LocalStore>>,
    pending: &PendingTracker,
    connectivity: &Connectivity,
    observer: &StatusObserver,
) {
    let (enabled, active) = {
        let store = store.lock().unwrap();
        (
            store.sync_enabled().unwrap_or(false),
            store
                .active_file()
                .unwrap_or_else(|_| DEFAULT_FILE_PATH.to_string()),
        )
    };

    let status = if !connectivity.is_online() {
        SyncStatus::new(SyncState::Offline, "", Some(&active))
    } else if !enabled {
        SyncStatus::new(SyncState::Disabled, "", None)
    } else if pending.is_pending(&active) {
        SyncStatus::new(SyncState::Pending, "", Some(&active))
    } else {
        SyncStatus::new(SyncState::Idle, "", Some(&active))
    };
    log::info!("Initial sync state: {:?}", status.state);
    observer(status);
}

async fn monitor_loop(
    coordinator: Arc<SyncCoordinator>,
    store: Arc<Mutex<LocalStore>>,
    pending: Arc<PendingTracker>,
    connectivity: Connectivity,
    observer: StatusObserver,
    mut receiver: mpsc::UnboundedReceiver<MonitorMessage>,
    mut changes: mpsc::UnboundedReceiver<LocalChange>,
) {
    log::info!("Sync monitor started");

    // Deadline of the single shared debounce timer. Every fresh local
    // change replaces it, collapsing edit bursts into one run.
    let mut deadline: Option<Instant> = None;
    let mut changes_open = true;

    loop {
        tokio::select! {
            _ = wait_until(deadline) => {
                deadline = None;
                log::debug!("Debounce timer elapsed, triggering sync");
                coordinator.coordinate().await;
            }

            change = changes.recv(), if changes_open => {
                match change {
                    Some(change) => handle_local_change(
                        change.file_path,
                        &store,
                        &pending,
                        &connectivity,
                        &observer,
                        &mut deadline,
                    ),
                    None => {
                        log::debug!("Local-change channel closed");
                        changes_open = false;
                    }
                }
            }

            msg = receiver.recv() => {
                match msg {
                    Some(MonitorMessage::LocalChange { file_path }) => handle_local_change(
                        file_path,
                        &store,
                        &pending,
                        &connectivity,
                        &observer,
                        &mut deadline,
                    ),
                    Some(MonitorMessage::Online) => {
                        log::info!("Application came online");
                        deadline = None;
                        let (enabled, active) = workspace_snapshot(&store);
                        if !enabled {
                            observer(SyncStatus::new(SyncState::Disabled, "", None));
                        } else if pending.is_pending(&active) {
                            log::info!(
                                "Pending commit detected for {} after reconnect, syncing",
                                active
                            );
                            coordinator.coordinate().await;
                        } else {
                            observer(SyncStatus::new(SyncState::Idle, "", Some(&active)));
                        }
                    }
                    Some(MonitorMessage::Offline) => {
                        log::info!("Application went offline");
                        let (_, active) = workspace_snapshot(&store);
                        observer(SyncStatus::new(SyncState::Offline, "", Some(&active)));
                    }
                    Some(MonitorMessage::SyncNow) => {
                        deadline = None;
                        coordinator.coordinate().await;
                    }
                    Some(MonitorMessage::Shutdown) | None => {
                        log::info!("Sync monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn workspace_snapshot(store: &Arc<Mutex<LocalStore>>) -> (bool, String) {
    let store = store.lock().unwrap();
    (
        store.sync_enabled().unwrap_or(false),
        store
            .active_file()
            .unwrap_or_else(|_| DEFAULT_FILE_PATH.to_string()),
    )
}

fn handle_local_change(
    file_path: String,
    store: &Arc<Mutex<LocalStore>>,
    pending: &PendingTracker,
    connectivity: &Connectivity,
    observer: &StatusObserver,
    deadline: &mut Option<Instant>,
) {
    let (_, active) = workspace_snapshot(store);
    if file_path != active {
        log::debug!("Ignoring local change for non-active file {}", file_path);
        return;
    }

    // The dirty mark lands before any scheduling, so a crash or an
    // offline window between the edit and the debounced run cannot lose
    // the change.
    pending.set_pending(&active);

    if !connectivity.is_online() {
        log::warn!("Offline: recorded pending commit for {}", active);
        observer(SyncStatus::new(SyncState::Pending, "", Some(&active)));
        *deadline = None;
        return;
    }

    log::debug!(
        "Local data changed for {}, debouncing sync ({:?})",
        active,
        SYNC_DEBOUNCE_DELAY
    );
    *deadline = Some(Instant::now() + SYNC_DEBOUNCE_DELAY);
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
    use crate::sync::gateway::{GatewayError, RemoteFileResult, RemoteStore};

    #[derive(Default)]
    struct CountingRemote {
        content: Mutex<Option<String>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RemoteStore for CountingRemote {
        async fn read(&self, _name: &str) -> Result<RemoteFileResult, GatewayError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(match self.content.lock().unwrap().clone() {
                Some(content) => RemoteFileResult {
                    found: true,
                    content: Some(content),
                    last_commit: None,
                },
                None => RemoteFileResult::absent(),
            })
        }

        async fn write(
            &self,
            _name: &str,
            content: &str,
            _commit_message: &str,
        ) -> Result<CommitInfo, GatewayError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.content.lock().unwrap() = Some(content.to_string());
            Ok(CommitInfo {
                hash: "hash".to_string(),
                message: String::new(),
                date: Utc::now(),
                author: String::new(),
                email: String::new(),
            })
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
        remote: Arc<CountingRemote>,
        monitor: SyncMonitor,
        statuses: Arc<Mutex<Vec<SyncStatus>>>,
    }

    fn harness(online: bool, enabled: bool) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().to_path_buf());
        store.init().unwrap();
        store.set_sync_enabled(enabled).unwrap();
        let store = Arc::new(Mutex::new(store));

        let pending = Arc::new(PendingTracker::load(temp.path()));
        let remote = Arc::new(CountingRemote::default());
        let connectivity = Connectivity::new(online);

        let statuses: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();
        let observer: StatusObserver = {
            let statuses = Arc::clone(&statuses);
            Arc::new(move |status| statuses.lock().unwrap().push(status))
        };

        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            connectivity.clone(),
            Arc::clone(&observer),
        ));

        let monitor = start_monitor(
            coordinator,
            Arc::clone(&store),
            Arc::clone(&pending),
            connectivity,
            observer,
        );

        Harness {
            _temp: temp,
            store,
            pending,
            remote,
            monitor,
            statuses,
        }
    }

    fn states(h: &Harness) -> Vec<SyncState> {
        h.statuses.lock().unwrap().iter().map(|s| s.state).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_priorities() {
        let offline = harness(false, true);
        assert_eq!(states(&offline)[0], SyncState::Offline);

        let disabled = harness(true, false);
        assert_eq!(states(&disabled)[0], SyncState::Disabled);
        assert_eq!(disabled.statuses.lock().unwrap()[0].file_path, None);

        let idle = harness(true, true);
        assert_eq!(states(&idle)[0], SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_collapse_into_one_run() {
        let h = harness(true, true);
        {
            let store = h.store.lock().unwrap();
            store.add_task(DEFAULT_FILE_PATH, "Buy milk").unwrap();
            store.add_task(DEFAULT_FILE_PATH, "Call mom").unwrap();
        }

        // Both store notifications land before the debounce elapses.
        tokio::time::sleep(SYNC_DEBOUNCE_DELAY + Duration::from_secs(1)).await;

        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 1);
        assert_eq!(h.remote.writes.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.remote.content.lock().unwrap().as_deref(),
            Some("Buy milk\nCall mom")
        );
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(*states(&h).last().unwrap(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_edit_goes_pending_then_syncs_on_reconnect() {
        let h = harness(false, true);
        {
            let store = h.store.lock().unwrap();
            store.add_task(DEFAULT_FILE_PATH, "Buy milk").unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(*states(&h).last().unwrap(), SyncState::Pending);
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 0);

        // No debounce run fires while offline.
        tokio::time::sleep(SYNC_DEBOUNCE_DELAY * 2).await;
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 0);
        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));

        // Reconnect: the pending flag triggers an immediate run.
        h.monitor.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.remote.writes.load(Ordering::SeqCst), 1);
        assert!(!h.pending.is_pending(DEFAULT_FILE_PATH));
        assert_eq!(*states(&h).last().unwrap(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_pending_reports_idle() {
        let h = harness(false, true);
        h.monitor.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 0);
        assert_eq!(*states(&h).last().unwrap(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_offline_reports_offline_and_keeps_flag() {
        let h = harness(true, true);
        h.pending.set_pending(DEFAULT_FILE_PATH);

        h.monitor.set_online(false);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*states(&h).last().unwrap(), SyncState::Offline);
        assert!(h.pending.is_pending(DEFAULT_FILE_PATH));
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_to_non_active_files_are_ignored() {
        let h = harness(true, true);
        h.monitor.notify_local_change("/other.txt");
        tokio::time::sleep(SYNC_DEBOUNCE_DELAY * 2).await;

        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 0);
        assert!(!h.pending.is_pending("/other.txt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sync_cancels_scheduled_run() {
        let h = harness(true, true);
        {
            let store = h.store.lock().unwrap();
            store.add_task(DEFAULT_FILE_PATH, "Buy milk").unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.monitor.request_sync();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 1);

        // The debounced run was canceled; nothing further fires.
        tokio::time::sleep(SYNC_DEBOUNCE_DELAY * 2).await;
        assert_eq!(h.remote.reads.load(Ordering::SeqCst), 1);
    }
}
