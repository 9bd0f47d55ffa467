//! Google Cloud provider for taskfleet
//!
//! A task becomes a Cloud Storage bucket, a pair of firewall rules scoped to
//! the task's network tag, an instance template carrying the worker startup
//! script and SSH key, and a zonal managed instance group sized to the task
//! parallelism.
//!
//! # Resource order
//!
//! ```text
//! default network → image → permission set → SSH key
//!   → bucket → credentials → ingress rule → egress rule
//!   → instance template → instance group
//! ```

pub mod api;
pub mod cli;
pub mod resources;
pub mod task;

pub use api::GcpApi;
pub use cli::GcloudCli;
pub use task::{GcpTask, list, list_tasks};
