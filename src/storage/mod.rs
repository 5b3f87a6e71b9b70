mod local_store;
mod models;

pub use local_store::{LocalStore, StoreError};
pub use models::*;
