//! AWS resource graph

pub mod compute;
pub mod network;
pub mod storage;

pub use compute::{
    AutoScalingGroup, Fleet, Image, KeyPair, LaunchTemplate, LaunchTemplateInputs, PermissionSet,
    instance_type,
};
pub use network::{DefaultSubnets, DefaultVpc, SecurityGroup};
pub use storage::{Bucket, Credentials};
