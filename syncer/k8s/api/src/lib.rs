#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod kinds;
pub mod projectcalico;

pub use self::projectcalico::{
    HostEndpoint, IpPool, IpamBlock, Node, OverlayRoutingMode, Profile,
    RemoteClusterConfiguration, RemoteClusterConfigurationSpec, ValidationError, WorkloadEndpoint,
};
pub use k8s_openapi::{
    api::core::v1::{Endpoints, ObjectReference, Secret, Service},
    apimachinery::pkg::apis::meta::v1::Time,
    ByteString,
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    Resource,
};
