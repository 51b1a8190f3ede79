pub mod backoff;
pub mod controller;
pub mod error;
pub mod events;
pub mod intent;

pub use backoff::{BackoffPolicy, RetryState};
pub use controller::{StatusController, StatusSyncConfig};
pub use error::SyncError;
pub use events::{StatusEvent, StatusEventFeed};
pub use intent::{IntentStore, StatusIntent};
