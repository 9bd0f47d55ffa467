//! Google Cloud resource graph

pub mod compute;
pub mod network;
pub mod storage;

pub use compute::{
    Fleet, Image, InstanceGroup, InstanceTemplate, InstanceTemplateInputs, PermissionSet, machine_type,
};
pub use network::{DefaultNetwork, Firewall};
pub use storage::{Bucket, Credentials};
