//! taskfleet storage sync
//!
//! Moves task directories between local disk and the task's remote storage,
//! and derives task status and logs from the reports workers write under
//! `<remote>/reports`.
//!
//! Remotes are object store URLs (`s3://bucket`, `gs://bucket`,
//! `az://container`, `file:///path`) or plain local paths. Store options such
//! as credentials travel in the query string:
//!
//! ```text
//! s3://tfl-train-1a2b3c4d?region=us-west-1&access_key_id=...&secret_access_key=...
//! ```

pub mod delete;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod progress;
pub mod reports;
pub mod transfer;

pub use delete::delete;
pub use endpoint::{Endpoint, join, with_options};
pub use error::{Result, StorageError};
pub use filter::IncludeFilter;
pub use reports::{StatusReport, logs, reports, status};
pub use transfer::{TransferSummary, transfer};
