//! Azure resource graph

pub mod compute;
pub mod network;
pub mod storage;

pub use compute::{Fleet, Image, PermissionSet, ScaleSet, ScaleSetInputs, vm_size};
pub use network::{SecurityGroup, Subnet, VirtualNetwork, security_rules};
pub use storage::{BlobContainer, Credentials, ResourceGroup, StorageAccount};
