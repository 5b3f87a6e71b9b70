pub mod api;
pub mod config;
pub mod gateway;
pub mod monitor;
pub mod pending;

mod coordinator;

pub use api::GitApiClient;
pub use config::{RenderCallback, StatusObserver, SyncState, SyncStatus};
pub use coordinator::SyncCoordinator;
pub use gateway::{GatewayError, RemoteFileResult, RemoteStore};
pub use monitor::{start_monitor, Connectivity, SyncMonitor, SYNC_DEBOUNCE_DELAY};
pub use pending::PendingTracker;
