use crate::processors;
use calico_syncer_core::{
    k8s::{
        self, kinds,
        projectcalico::{cidr_to_name, IpamBlockSpec},
        OverlayRoutingMode, RemoteClusterConfiguration,
    },
    AllocationBlock, CalicoApiConfig, KVPair, Key, ListOptions, Resource, ResourceKey, Update,
    Value,
};
use calico_syncer_remote::RemoteClusterInterface;
use calico_syncer_watch::ResourceType;
use tracing::trace;

const NODE_ATTRIBUTE: &str = "node";

/// Federates the endpoints and profiles of remote clusters into Felix's view.
///
/// Data that Felix can treat like local data keeps its key type, with the
/// host or profile name prefixed by the cluster name. Data that must not be
/// merged with local data, such as IP pools and IPAM blocks, is wrapped in a
/// `RemoteClusterResource` key. Wireguard data is never federated.
#[derive(Copy, Clone, Debug, Default)]
pub struct FelixRemoteClusterProcessor;

impl RemoteClusterInterface for FelixRemoteClusterProcessor {
    fn get_calico_api_config(&self, rcc: &RemoteClusterConfiguration) -> Option<CalicoApiConfig> {
        crate::calico_api_config(rcc)
    }

    fn create_resource_types(&self, overlay_routing: OverlayRoutingMode) -> Vec<ResourceType> {
        let mut resource_types = vec![
            ResourceType::new(ListOptions::resource(kinds::WORKLOAD_ENDPOINT))
                .with_processor(processors::workload_endpoint()),
            ResourceType::new(ListOptions::resource(kinds::HOST_ENDPOINT))
                .with_processor(processors::host_endpoint()),
            ResourceType::new(ListOptions::resource(kinds::PROFILE))
                .with_processor(processors::profile()),
        ];
        if overlay_routing == OverlayRoutingMode::Enabled {
            resource_types.extend([
                ResourceType::new(ListOptions::resource(kinds::NODE))
                    .with_processor(processors::node()),
                // Pools and blocks are relayed as they are so that they never
                // overlap with local ones.
                ResourceType::new(ListOptions::resource(kinds::IP_POOL)),
                ResourceType::new(ListOptions::Blocks),
            ]);
        }
        resource_types
    }

    fn convert_updates(&self, cluster: &str, updates: Vec<Update>) -> Vec<Update> {
        updates
            .into_iter()
            .filter_map(|update| convert(cluster, update))
            .collect()
    }
}

/// Rewrites a single update from a remote cluster, or drops it.
///
/// # Panics
///
/// If the update carries a key that a remote syncer never produces.
fn convert(cluster: &str, update: Update) -> Option<Update> {
    let Update { kv, update_type } = update;
    let KVPair {
        key,
        value,
        revision,
        ttl,
    } = kv;
    let prefix = |name: String| format!("{cluster}/{name}");

    let (key, value) = match key {
        Key::HostEndpoint {
            hostname,
            endpoint_id,
        } => {
            let value = value.map(|v| match v {
                Value::HostEndpoint(mut hep) => {
                    hep.profile_ids = hep.profile_ids.into_iter().map(prefix).collect();
                    Value::HostEndpoint(hep)
                }
                v => v,
            });
            let key = Key::HostEndpoint {
                hostname: prefix(hostname),
                endpoint_id,
            };
            (key, value)
        }

        Key::WorkloadEndpoint {
            hostname,
            orchestrator_id,
            workload_id,
            endpoint_id,
        } => {
            let value = value.map(|v| match v {
                Value::WorkloadEndpoint(mut wep) => {
                    wep.profile_ids = wep.profile_ids.into_iter().map(prefix).collect();
                    Value::WorkloadEndpoint(wep)
                }
                v => v,
            });
            let key = Key::WorkloadEndpoint {
                hostname: prefix(hostname),
                orchestrator_id,
                workload_id,
                endpoint_id,
            };
            (key, value)
        }

        Key::ProfileRules { name } => {
            // Policy is never federated.
            let value = value.map(|v| match v {
                Value::ProfileRules(_) => Value::ProfileRules(Default::default()),
                v => v,
            });
            (Key::ProfileRules { name: prefix(name) }, value)
        }

        Key::ProfileLabels { name } => (Key::ProfileLabels { name: prefix(name) }, value),

        Key::HostIp { hostname } => (
            Key::HostIp {
                hostname: prefix(hostname),
            },
            value,
        ),

        Key::HostConfig { hostname, name } => (
            Key::HostConfig {
                hostname: prefix(hostname),
                name,
            },
            value,
        ),

        Key::Wireguard { node_name } => {
            trace!(%node_name, "Not federating wireguard data");
            return None;
        }

        Key::Resource(resource) => convert_resource(cluster, resource, value),

        Key::Block { cidr } => {
            let name = cidr_to_name(&cidr.to_string());
            let key = Key::RemoteClusterResource {
                cluster: cluster.to_string(),
                resource: ResourceKey::new(kinds::IPAM_BLOCK, &name),
            };
            let value = value.map(|v| match v {
                Value::Block(block) => Value::Resource(remote_block(cluster, &name, block).into()),
                v => v,
            });
            (key, value)
        }

        key @ (Key::RemoteClusterResource { .. } | Key::RemoteClusterStatus { .. }) => {
            panic!("unexpected key from remote cluster {cluster}: {key}")
        }
    };

    Some(Update::new(
        KVPair {
            key,
            value,
            revision,
            ttl,
        },
        update_type,
    ))
}

fn convert_resource(
    cluster: &str,
    mut resource: ResourceKey,
    value: Option<Value>,
) -> (Key, Option<Value>) {
    match resource.kind.as_str() {
        // Profiles carry the labels that endpoints inherit, but not their
        // rules.
        kinds::PROFILE => {
            resource.name = format!("{cluster}/{}", resource.name);
            let value = value.map(|v| match v {
                Value::Resource(Resource::Profile(mut profile)) => {
                    profile.spec.ingress.clear();
                    profile.spec.egress.clear();
                    Value::Resource(Resource::Profile(profile))
                }
                v => v,
            });
            (Key::Resource(resource), value)
        }

        kinds::NODE => {
            resource.name = format!("{cluster}/{}", resource.name);
            let value = value.map(|v| match v {
                Value::Resource(Resource::Node(mut node)) => {
                    node.spec.wireguard = None;
                    if let Some(status) = node.status.as_mut() {
                        status.wireguard_public_key.clear();
                        status.wireguard_public_key_v6.clear();
                    }
                    Value::Resource(Resource::Node(node))
                }
                v => v,
            });
            (Key::Resource(resource), value)
        }

        kinds::IP_POOL => {
            let key = Key::RemoteClusterResource {
                cluster: cluster.to_string(),
                resource,
            };
            (key, value)
        }

        kind => panic!("unexpected {kind} resource from remote cluster {cluster}"),
    }
}

/// Converts a v1 allocation block into a v3 `IPAMBlock` whose node
/// references name the remote cluster.
fn remote_block(cluster: &str, name: &str, block: AllocationBlock) -> k8s::IpamBlock {
    let AllocationBlock {
        cidr,
        affinity,
        allocations,
        unallocated,
        mut attributes,
        deleted,
    } = block;

    let affinity = affinity.map(|affinity| {
        let host = affinity.strip_prefix("host:").unwrap_or(&affinity);
        format!("host:{cluster}/{host}")
    });
    for attribute in &mut attributes {
        if let Some(node) = attribute.secondary.get_mut(NODE_ATTRIBUTE) {
            *node = format!("{cluster}/{node}");
        }
    }

    k8s::IpamBlock::new(
        name,
        IpamBlockSpec {
            cidr: cidr.to_string(),
            affinity,
            allocations,
            unallocated,
            attributes,
            deleted,
        },
    )
}
