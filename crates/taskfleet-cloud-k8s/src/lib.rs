//! Kubernetes provider for taskfleet
//!
//! A task is a persistent volume claim plus a job whose parallelism is the
//! task parallelism. The volume doubles as the task directory: files are
//! copied in and out of a running pod, so no object storage is involved.
//!
//! The `directory` attribute reads `storageClass:sizeGiB[:path]`, where
//! `path` is the local directory synchronized with the volume.
//!
//! # Resource order
//!
//! ```text
//! persistent volume claim → job
//! ```

pub mod api;
pub mod cli;
pub mod resources;
pub mod task;

pub use api::KubernetesApi;
pub use cli::KubectlCli;
pub use task::{K8sTask, list, list_tasks};
