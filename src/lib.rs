//! Todo.txt task lists with Git-backed synchronization.
//!
//! The `storage` module persists per-file task records client-side, the
//! `sync` module coordinates them against a remote Git file server, and
//! the `git` + `server` modules are that server: a REST surface over a
//! git2-managed repository.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod git;
pub mod server;
pub mod storage;
pub mod sync;

use storage::{LocalStore, StoreError};
use sync::{
    start_monitor, Connectivity, PendingTracker, RemoteStore, RenderCallback, StatusObserver,
    SyncCoordinator, SyncMonitor,
};

/// A wired-up sync stack for one data directory.
pub struct SyncRuntime {
    pub store: Arc<Mutex<LocalStore>>,
    pub pending: Arc<PendingTracker>,
    pub coordinator: Arc<SyncCoordinator>,
    pub monitor: SyncMonitor,
}

/// Assemble the local store, pending tracker, coordinator and monitor
/// against a remote gateway and start the monitor loop. Must be called
/// from within a tokio runtime; the initial sync state is reported to
/// the observer before this returns.
pub fn start_sync(
    data_dir: PathBuf,
    remote: Arc<dyn RemoteStore>,
    observer: StatusObserver,
    render: Option<RenderCallback>,
    online: bool,
) -> Result<SyncRuntime, StoreError> {
    let store = LocalStore::new(data_dir.clone());
    store.init()?;
    let store = Arc::new(Mutex::new(store));

    let pending = Arc::new(PendingTracker::load(&data_dir));
    let connectivity = Connectivity::new(online);

    let mut coordinator = SyncCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&pending),
        remote,
        connectivity.clone(),
        Arc::clone(&observer),
    );
    if let Some(render) = render {
        coordinator = coordinator.with_render_callback(render);
    }
    let coordinator = Arc::new(coordinator);

    let monitor = start_monitor(
        Arc::clone(&coordinator),
        Arc::clone(&store),
        Arc::clone(&pending),
        connectivity,
        observer,
    );

    Ok(SyncRuntime {
        store,
        pending,
        coordinator,
        monitor,
    })
}
