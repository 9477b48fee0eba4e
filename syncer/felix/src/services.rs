//! The federated-services syncer: Kubernetes Services and Endpoints from the
//! local cluster and, kept apart from them, from each remote cluster.

use crate::{CALICO_CLIENT_ID, K8S_CLIENT_ID};
use calico_syncer_core::{
    k8s::{kinds, OverlayRoutingMode, RemoteClusterConfiguration},
    CalicoApiConfig, Client, Error, KVPair, Key, ListOptions, SyncerCallbacks, Update,
};
use calico_syncer_remote::{FederationBuilder, RemoteClusterInterface};
use calico_syncer_watch::{ResourceType, WatcherSyncer};
use std::sync::Arc;

/// Wraps every key from a remote cluster in a `RemoteClusterResource` key.
#[derive(Copy, Clone, Debug, Default)]
pub struct ServicesRemoteClusterProcessor;

/// Builds the federated-services syncer. Configurations are read from the
/// Calico datastore and Services and Endpoints from Kubernetes.
pub fn new(
    calico: Arc<dyn Client>,
    k8s: Arc<dyn Client>,
    callbacks: Arc<dyn SyncerCallbacks>,
    federation: FederationBuilder,
) -> Result<WatcherSyncer, Error> {
    let resource_types = vec![
        ResourceType::new(ListOptions::resource(kinds::REMOTE_CLUSTER_CONFIGURATION))
            .with_client(CALICO_CLIENT_ID),
        ResourceType::new(ListOptions::resource(kinds::SERVICE)).with_client(K8S_CLIENT_ID),
        ResourceType::new(ListOptions::resource(kinds::ENDPOINTS)).with_client(K8S_CLIENT_ID),
    ];
    let clients = [
        (CALICO_CLIENT_ID.to_string(), calico),
        (K8S_CLIENT_ID.to_string(), k8s),
    ];
    let callbacks = federation.build(callbacks, ServicesRemoteClusterProcessor);
    WatcherSyncer::new_multi_client(clients, resource_types, Arc::new(callbacks))
}

impl RemoteClusterInterface for ServicesRemoteClusterProcessor {
    fn get_calico_api_config(&self, rcc: &RemoteClusterConfiguration) -> Option<CalicoApiConfig> {
        crate::calico_api_config(rcc)
    }

    fn create_resource_types(&self, _: OverlayRoutingMode) -> Vec<ResourceType> {
        vec![
            ResourceType::new(ListOptions::resource(kinds::SERVICE)),
            ResourceType::new(ListOptions::resource(kinds::ENDPOINTS)),
        ]
    }

    fn convert_updates(&self, cluster: &str, updates: Vec<Update>) -> Vec<Update> {
        updates
            .into_iter()
            .map(|Update { kv, update_type }| {
                let key = match kv.key {
                    Key::Resource(resource) => Key::RemoteClusterResource {
                        cluster: cluster.to_string(),
                        resource,
                    },
                    key => panic!("unexpected key from remote cluster {cluster}: {key}"),
                };
                Update::new(KVPair { key, ..kv }, update_type)
            })
            .collect()
    }
}
