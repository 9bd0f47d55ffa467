//! taskfleet cloud core
//!
//! Shared contracts for every taskfleet provider: the task attribute model,
//! identifiers, the resource/data source lifecycle and the step orchestrator
//! that sequences them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        taskfleet CLI / control plane API        │
//! └─────────────────┬───────────────────────────────┘
//!                   │  Box<dyn Task>
//! ┌─────────────────▼───────────────────────────────┐
//! │                taskfleet-cloud                  │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ trait Task   │  │ run_steps (orchestrator) │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ Resource     │  │ DataSource               │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! └───────┬─────────┬─────────┬─────────┬───────────┘
//!         │         │         │         │
//!      ┌──▼──┐   ┌──▼──┐   ┌──▼──┐   ┌──▼──┐
//!      │ aws │   │ gcp │   │ az  │   │ k8s │
//!      └─────┘   └─────┘   └─────┘   └─────┘
//! ```

pub mod cli;
pub mod cloud;
pub mod error;
pub mod identifier;
pub mod machine;
pub mod model;
pub mod resource;
pub mod ssh;
pub mod step;
pub mod task;

// Re-exports
pub use cli::CommandRunner;
pub use cloud::{Cloud, Provider, Region, Timeouts, with_timeout};
pub use error::{CloudError, Result};
pub use identifier::Identifier;
pub use model::{
    Environment, Event, Firewall, FirewallRule, SavedParallelism, Size, Spot, Status, StatusCode,
    StorageCredentials, TaskAttributes,
};
pub use resource::{DataSource, Resource, Slot, ignore_not_found};
pub use ssh::{KeyMaterial, SshKeyPair};
pub use step::{Step, run_steps};
pub use task::{Bounded, Task};
