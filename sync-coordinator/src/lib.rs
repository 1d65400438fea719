#![allow(clippy::missing_docs_in_private_items)]

pub mod coordinator;
pub mod dates;
pub mod monitor;
pub mod persistence;
pub mod upload;

pub use coordinator::{SyncCoordinator, SyncMode, SyncOutcome, SyncRequest};
pub use monitor::{ImportStatusMonitor, UploadStatusRecord};
pub use persistence::{read_upload_history, LastSyncResult};
pub use upload::UploadSummary;
