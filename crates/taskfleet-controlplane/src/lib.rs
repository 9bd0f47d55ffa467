//! taskfleet control plane
//!
//! Serves the task lifecycle over HTTP. Long-running operations are handed to
//! the [`JobManager`] and polled by job id.
//!
//! ```text
//! HTTP ──► server ──► credentials ──► TaskFactory ──► Box<dyn Task>
//!             │                                          │
//!             └──────────► JobManager ◄──────────────────┘
//!                          (create / delete)
//! ```

pub mod credentials;
pub mod error;
pub mod factory;
pub mod jobs;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use factory::{CloudTaskFactory, TaskFactory};
pub use jobs::{JobManager, JobState, JobStatus};
pub use server::{AppState, router, serve};
