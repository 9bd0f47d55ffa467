//! Kubernetes resource graph

pub mod claim;
pub mod job;

pub use claim::{PersistentVolumeClaim, VolumeSpec};
pub use job::{Job, JobState, Machine, TASK_DIRECTORY, Workload};
