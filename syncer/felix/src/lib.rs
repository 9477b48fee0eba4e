#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The syncer that feeds Felix, and the federated-services syncer.
//!
//! Both watch `RemoteClusterConfiguration` resources locally and federate the
//! data of each configured remote cluster into their output.

pub mod processors;
mod remote;
pub mod services;

pub use self::remote::FelixRemoteClusterProcessor;
use calico_syncer_core::{
    apiconfig::{EtcdConfig, KubeConfig},
    k8s::{kinds, RemoteClusterConfiguration},
    CalicoApiConfig, Client, DatastoreType, Error, ListOptions, SyncerCallbacks,
};
use calico_syncer_remote::FederationBuilder;
use calico_syncer_watch::{ResourceType, WatcherSyncer};
use std::sync::Arc;

/// Names the client that serves Calico resources.
pub const CALICO_CLIENT_ID: &str = "calico";

/// Names the client that serves Kubernetes Services and Endpoints.
pub const K8S_CLIENT_ID: &str = "k8s";

/// Builds the Felix syncer over the local Calico datastore.
///
/// When a Kubernetes client is given, Services are synced from it as well.
/// Remote clusters are federated through `federation`.
pub fn new(
    calico: Arc<dyn Client>,
    services: Option<Arc<dyn Client>>,
    callbacks: Arc<dyn SyncerCallbacks>,
    federation: FederationBuilder,
) -> Result<WatcherSyncer, Error> {
    let mut resource_types = vec![
        ResourceType::new(ListOptions::resource(kinds::REMOTE_CLUSTER_CONFIGURATION)),
        ResourceType::new(ListOptions::resource(kinds::HOST_ENDPOINT))
            .with_processor(processors::host_endpoint()),
        ResourceType::new(ListOptions::resource(kinds::WORKLOAD_ENDPOINT))
            .with_processor(processors::workload_endpoint()),
        ResourceType::new(ListOptions::resource(kinds::PROFILE))
            .with_processor(processors::profile()),
        ResourceType::new(ListOptions::resource(kinds::NODE)).with_processor(processors::node()),
        ResourceType::new(ListOptions::resource(kinds::IP_POOL)),
    ]
    .into_iter()
    .map(|rt| rt.with_client(CALICO_CLIENT_ID))
    .collect::<Vec<_>>();

    let mut clients = vec![(CALICO_CLIENT_ID.to_string(), calico)];
    if let Some(services) = services {
        clients.push((K8S_CLIENT_ID.to_string(), services));
        resource_types.push(
            ResourceType::new(ListOptions::resource(kinds::SERVICE)).with_client(K8S_CLIENT_ID),
        );
    }

    let callbacks = federation.build(callbacks, FelixRemoteClusterProcessor);
    WatcherSyncer::new_multi_client(clients, resource_types, Arc::new(callbacks))
}

/// Derives the datastore configuration described inline by `rcc`, or `None`
/// if its datastore type is not supported.
///
/// Only the fields that apply to the datastore type are carried over.
pub fn calico_api_config(rcc: &RemoteClusterConfiguration) -> Option<CalicoApiConfig> {
    let datastore_type = rcc.spec.datastore_type.parse::<DatastoreType>().ok()?;
    let config = match datastore_type {
        DatastoreType::EtcdV3 => CalicoApiConfig {
            datastore_type,
            etcd: rcc.spec.etcd.clone(),
            kube: KubeConfig::default(),
        },
        DatastoreType::Kubernetes => CalicoApiConfig {
            datastore_type,
            etcd: EtcdConfig::default(),
            kube: rcc.spec.kube.clone(),
        },
    };
    Some(config)
}

#[cfg(test)]
mod tests;
