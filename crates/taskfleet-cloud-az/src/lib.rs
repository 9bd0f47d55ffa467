//! Azure provider for taskfleet
//!
//! Every task lives in its own resource group: a storage account with one
//! blob container, a virtual network whose subnet carries the task security
//! group, and a virtual machine scale set sized to the task parallelism.
//! Listing tasks means listing resource groups.
//!
//! # Resource order
//!
//! ```text
//! image → permission set → SSH key
//!   → resource group → storage account → container → credentials
//!   → virtual network → security group → subnet → scale set
//! ```

pub mod api;
pub mod cli;
pub mod resources;
pub mod task;

pub use api::AzApi;
pub use cli::AzCli;
pub use task::{AzTask, list, list_tasks};
