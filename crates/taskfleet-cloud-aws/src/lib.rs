//! AWS provider for taskfleet
//!
//! A task becomes an S3 bucket for its data and reports, a security group,
//! an imported key pair, a launch template carrying the worker startup script
//! and an auto scaling group sized to the task parallelism.
//!
//! # Resource order
//!
//! ```text
//! default VPC → default subnets → image → permission set
//!   → bucket → security group → key pair → credentials
//!   → launch template → auto scaling group
//! ```
//!
//! Deletion runs the resource part of this chain backwards.

pub mod api;
pub mod sdk;
pub mod resources;
pub mod task;

pub use api::AwsApi;
pub use sdk::AwsSdk;
pub use task::{AwsTask, list, list_tasks};
