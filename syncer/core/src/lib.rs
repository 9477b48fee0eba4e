#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
pub mod apiconfig;
mod error;
mod key;
pub mod memory;
mod model;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use self::{
    api::{
        Client, ClientFactory, KVPairList, ListOptions, ResourceListOptions, Syncer,
        SyncerCallbacks, UpdateProcessor, WatchEvent, WatchStream,
    },
    apiconfig::{CalicoApiConfig, DatastoreType},
    error::Error,
    key::{Key, ResourceKey},
    model::{
        AllocationAttribute, AllocationBlock, EndpointPort, HostEndpoint, KVPair, ProfileRules,
        RemoteClusterStatus, RemoteClusterStatusType, Resource, Rule, SyncStatus, Update,
        UpdateType, Value, Wireguard, WorkloadEndpoint,
    },
};
pub use calico_syncer_k8s_api as k8s;
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

#[cfg(test)]
mod tests;
