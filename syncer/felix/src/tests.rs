use super::*;
use crate::services::ServicesRemoteClusterProcessor;
use calico_syncer_core::{
    k8s::{
        self,
        projectcalico::{
            EntityRule, EtcdConfig, HostEndpointSpec, NodeBgpSpec, NodeSpec, NodeStatus,
            NodeWireguardSpec, ProfileSpec, RemoteClusterConfigurationSpec, Rule,
            WorkloadEndpointSpec,
        },
        ObjectMeta, OverlayRoutingMode,
    },
    memory::{MemoryClient, MemoryClientFactory},
    testing::recorder,
    AllocationAttribute, AllocationBlock, HostEndpoint, IpNet, KVPair, Key, ProfileRules, Resource,
    ResourceKey, SyncStatus, Syncer, Update, UpdateProcessor, UpdateType, Value, Wireguard,
};
use calico_syncer_remote::RemoteClusterInterface;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::net::IpAddr;

const CLUSTER: &str = "remote-cluster";

fn host_endpoint(name: &str, node: &str) -> k8s::HostEndpoint {
    let mut hep = k8s::HostEndpoint::new(
        name,
        HostEndpointSpec {
            node: node.to_string(),
            interface_name: "eth0".to_string(),
            expected_ips: vec!["10.0.0.1".to_string(), "fd00::1".to_string()],
            profiles: vec!["default".to_string()],
            ..Default::default()
        },
    );
    hep.metadata.labels = Some(btreemap! { "role".to_string() => "gateway".to_string() });
    hep
}

fn profile_with_rules(name: &str) -> k8s::Profile {
    k8s::Profile::new(
        name,
        ProfileSpec {
            ingress: vec![Rule {
                action: "Allow".to_string(),
                source: EntityRule {
                    selector: "role == 'db'".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            egress: vec![Rule {
                action: "Deny".to_string(),
                ..Default::default()
            }],
            labels_to_apply: btreemap! { "team".to_string() => name.to_string() },
        },
    )
}

fn node(name: &str) -> k8s::Node {
    let mut node = k8s::Node::new(
        name,
        NodeSpec {
            bgp: Some(NodeBgpSpec {
                ipv4_address: "192.168.0.10/24".to_string(),
                ..Default::default()
            }),
            ipv4_vxlan_tunnel_addr: "10.65.0.1".to_string(),
            wireguard: Some(NodeWireguardSpec {
                interface_ipv4_address: "10.66.0.1".to_string(),
            }),
        },
    );
    node.status = Some(NodeStatus {
        wireguard_public_key: "jlkVyQYooZYzI2wFfNhSZez5eWh44yfq1wKVjLvSXgY=".to_string(),
        ..Default::default()
    });
    node
}

fn keys(kvs: &[KVPair]) -> Vec<(Key, bool)> {
    kvs.iter().map(|kv| (kv.key.clone(), kv.value.is_some())).collect()
}

fn new_update(key: Key, value: Value) -> Update {
    Update::new(KVPair::new(key, value), UpdateType::New)
}

fn deleted(key: Key) -> Update {
    Update::new(KVPair::deleted(key), UpdateType::Deleted)
}

fn convert(updates: Vec<Update>) -> Vec<Update> {
    FelixRemoteClusterProcessor.convert_updates(CLUSTER, updates)
}

#[test]
fn host_endpoint_processor_tracks_node_moves() {
    let mut processor = processors::host_endpoint();

    let kvs = processor
        .process(&KVPair::from_resource(host_endpoint("eth0", "node-1")).with_revision("5"))
        .unwrap();
    assert_eq!(
        kvs,
        vec![KVPair::new(
            Key::HostEndpoint {
                hostname: "node-1".to_string(),
                endpoint_id: "eth0".to_string(),
            },
            Value::HostEndpoint(HostEndpoint {
                name: "eth0".to_string(),
                expected_ipv4_addrs: vec!["10.0.0.1".parse().unwrap()],
                expected_ipv6_addrs: vec!["fd00::1".parse().unwrap()],
                labels: btreemap! { "role".to_string() => "gateway".to_string() },
                profile_ids: vec!["default".to_string()],
                ports: vec![],
            }),
        )
        .with_revision("5")]
    );

    // Moving the endpoint to another node deletes its old key.
    let kvs = processor
        .process(&KVPair::from_resource(host_endpoint("eth0", "node-2")).with_revision("6"))
        .unwrap();
    let old = Key::HostEndpoint {
        hostname: "node-1".to_string(),
        endpoint_id: "eth0".to_string(),
    };
    let new = Key::HostEndpoint {
        hostname: "node-2".to_string(),
        endpoint_id: "eth0".to_string(),
    };
    assert_eq!(keys(&kvs), vec![(old, false), (new.clone(), true)]);

    let v3 = ResourceKey::new("HostEndpoint", "eth0");
    let kvs = processor.process(&KVPair::deleted(v3)).unwrap();
    assert_eq!(keys(&kvs), vec![(new, false)]);
}

#[test]
fn host_endpoint_processor_rejects_bad_addresses() {
    let mut processor = processors::host_endpoint();
    let mut hep = host_endpoint("eth0", "node-1");
    hep.spec.expected_ips.push("not-an-ip".to_string());
    assert!(processor.process(&KVPair::from_resource(hep)).is_err());

    let mut hep = host_endpoint("eth0", "");
    hep.spec.expected_ips.clear();
    assert!(processor.process(&KVPair::from_resource(hep)).is_err());
}

#[test]
fn workload_endpoint_processor() {
    let mut wep = k8s::WorkloadEndpoint::new(
        "node--1-k8s-pod--a-eth0",
        WorkloadEndpointSpec {
            orchestrator: "k8s".to_string(),
            node: "node-1".to_string(),
            pod: "pod-a".to_string(),
            endpoint: "eth0".to_string(),
            interface_name: "cali1234".to_string(),
            ip_networks: vec!["10.65.0.5/32".to_string()],
            profiles: vec!["kns.default".to_string()],
            ..Default::default()
        },
    );
    wep.metadata.namespace = Some("default".to_string());
    wep.metadata.labels = Some(btreemap! { "app".to_string() => "web".to_string() });

    let kvs = processors::workload_endpoint()
        .process(&KVPair::from_resource(wep))
        .unwrap();
    assert_eq!(kvs.len(), 1);
    assert_eq!(
        kvs[0].key,
        Key::WorkloadEndpoint {
            hostname: "node-1".to_string(),
            orchestrator_id: "k8s".to_string(),
            workload_id: "default/pod-a".to_string(),
            endpoint_id: "eth0".to_string(),
        }
    );
    let Some(Value::WorkloadEndpoint(value)) = &kvs[0].value else {
        panic!("expected a workload endpoint: {:?}", kvs[0]);
    };
    assert_eq!(value.name, "cali1234");
    assert_eq!(value.ipv4_nets, vec!["10.65.0.5/32".parse::<IpNet>().unwrap()]);
    assert_eq!(value.profile_ids, vec!["kns.default".to_string()]);
    assert_eq!(
        value.labels,
        btreemap! {
            "app".to_string() => "web".to_string(),
            "projectcalico.org/namespace".to_string() => "default".to_string(),
            "projectcalico.org/orchestrator".to_string() => "k8s".to_string(),
        }
    );
}

#[test]
fn profile_processor_derives_rules_and_labels() {
    let mut processor = processors::profile();
    let profile = profile_with_rules("kns.default");
    let kvs = processor.process(&KVPair::from_resource(profile.clone())).unwrap();
    assert_eq!(
        kvs,
        vec![
            KVPair::new(
                Key::ProfileRules {
                    name: "kns.default".to_string()
                },
                Value::ProfileRules(ProfileRules {
                    inbound_rules: profile.spec.ingress.clone(),
                    outbound_rules: profile.spec.egress.clone(),
                }),
            ),
            KVPair::from_resource(profile.clone()),
            KVPair::new(
                Key::ProfileLabels {
                    name: "kns.default".to_string()
                },
                Value::Labels(btreemap! { "team".to_string() => "kns.default".to_string() }),
            ),
        ]
    );

    // Labels that are no longer applied are deleted.
    let mut unlabeled = profile;
    unlabeled.spec.labels_to_apply.clear();
    let kvs = processor.process(&KVPair::from_resource(unlabeled)).unwrap();
    assert_eq!(
        keys(&kvs),
        vec![
            (
                Key::ProfileLabels {
                    name: "kns.default".to_string()
                },
                false
            ),
            (
                Key::ProfileRules {
                    name: "kns.default".to_string()
                },
                true
            ),
            (ResourceKey::new("Profile", "kns.default").into(), true),
        ]
    );
}

#[test]
fn node_processor() {
    let kvs = processors::node()
        .process(&KVPair::from_resource(node("node-1")))
        .unwrap();
    let ip = "192.168.0.10".parse::<IpAddr>().unwrap();
    assert_eq!(
        kvs,
        vec![
            KVPair::new(
                Key::HostIp {
                    hostname: "node-1".to_string()
                },
                Value::HostIp(ip),
            ),
            KVPair::new(
                Key::HostConfig {
                    hostname: "node-1".to_string(),
                    name: "NodeIP".to_string(),
                },
                Value::Config("192.168.0.10".to_string()),
            ),
            KVPair::from_resource(node("node-1")),
            KVPair::new(
                Key::Wireguard {
                    node_name: "node-1".to_string()
                },
                Value::Wireguard(Wireguard {
                    interface_ipv4_addr: Some("10.66.0.1".parse().unwrap()),
                    public_key: "jlkVyQYooZYzI2wFfNhSZez5eWh44yfq1wKVjLvSXgY=".to_string(),
                }),
            ),
            KVPair::new(
                Key::HostConfig {
                    hostname: "node-1".to_string(),
                    name: "IPv4VXLANTunnelAddr".to_string(),
                },
                Value::Config("10.65.0.1".to_string()),
            ),
        ]
    );
}

#[test]
fn remote_endpoints_are_prefixed() {
    let hep = HostEndpoint {
        name: "eth0".to_string(),
        profile_ids: vec!["default".to_string()],
        ..Default::default()
    };
    let key = Key::HostEndpoint {
        hostname: "node2".to_string(),
        endpoint_id: "eth0".to_string(),
    };
    let updates = convert(vec![
        new_update(key.clone(), Value::HostEndpoint(hep.clone())),
        deleted(key),
    ]);

    let key = Key::HostEndpoint {
        hostname: "remote-cluster/node2".to_string(),
        endpoint_id: "eth0".to_string(),
    };
    assert_eq!(
        updates,
        vec![
            new_update(
                key.clone(),
                Value::HostEndpoint(HostEndpoint {
                    profile_ids: vec!["remote-cluster/default".to_string()],
                    ..hep
                }),
            ),
            deleted(key),
        ]
    );
}

#[test]
fn remote_profiles_lose_their_rules() {
    let profile = profile_with_rules("kns.default");
    let updates = convert(vec![
        new_update(
            Key::ProfileRules {
                name: "kns.default".to_string(),
            },
            Value::ProfileRules(ProfileRules {
                inbound_rules: profile.spec.ingress.clone(),
                outbound_rules: profile.spec.egress.clone(),
            }),
        ),
        Update::new(KVPair::from_resource(profile.clone()), UpdateType::New),
        new_update(
            Key::ProfileLabels {
                name: "kns.default".to_string(),
            },
            Value::Labels(profile.spec.labels_to_apply.clone()),
        ),
    ]);

    let mut stripped = profile.clone();
    stripped.spec.ingress.clear();
    stripped.spec.egress.clear();
    assert_eq!(
        updates,
        vec![
            new_update(
                Key::ProfileRules {
                    name: "remote-cluster/kns.default".to_string(),
                },
                Value::ProfileRules(ProfileRules::default()),
            ),
            new_update(
                ResourceKey::new("Profile", "remote-cluster/kns.default").into(),
                Value::Resource(Resource::Profile(stripped)),
            ),
            new_update(
                Key::ProfileLabels {
                    name: "remote-cluster/kns.default".to_string(),
                },
                Value::Labels(profile.spec.labels_to_apply),
            ),
        ]
    );
}

#[test]
fn remote_wireguard_data_is_dropped() {
    let mut processor = processors::node();
    let kvs = processor
        .process(&KVPair::from_resource(node("node-1")))
        .unwrap();
    let updates = convert(
        kvs.into_iter()
            .map(|kv| Update::new(kv, UpdateType::New))
            .collect(),
    );

    let keys = updates.iter().map(|u| u.key().clone()).collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            Key::HostIp {
                hostname: "remote-cluster/node-1".to_string()
            },
            Key::HostConfig {
                hostname: "remote-cluster/node-1".to_string(),
                name: "NodeIP".to_string(),
            },
            ResourceKey::new("Node", "remote-cluster/node-1").into(),
            Key::HostConfig {
                hostname: "remote-cluster/node-1".to_string(),
                name: "IPv4VXLANTunnelAddr".to_string(),
            },
        ]
    );
    let Some(Value::Resource(Resource::Node(node))) = updates[2].value() else {
        panic!("expected a node: {:?}", updates[2]);
    };
    assert_eq!(node.spec.wireguard, None);
    assert_eq!(node.status, Some(NodeStatus::default()));

    let updates = convert(vec![deleted(Key::Wireguard {
        node_name: "node-1".to_string(),
    })]);
    assert_eq!(updates, vec![]);
}

#[test]
fn remote_pools_and_blocks_are_kept_apart() {
    let pool = k8s::IpPool::new(
        "default-ipv4-ippool",
        k8s::projectcalico::IpPoolSpec {
            cidr: "10.65.0.0/16".to_string(),
            ..Default::default()
        },
    );
    let cidr = "10.65.1.0/26".parse().unwrap();
    let block = AllocationBlock {
        cidr,
        affinity: Some("host:node-1".to_string()),
        allocations: vec![Some(0), None],
        unallocated: vec![1],
        attributes: vec![AllocationAttribute {
            handle_id: Some("k8s-pod-network.abc".to_string()),
            secondary: btreemap! {
                "node".to_string() => "node-1".to_string(),
                "pod".to_string() => "pod-a".to_string(),
            },
        }],
        deleted: false,
    };

    let updates = convert(vec![
        Update::new(KVPair::from_resource(pool.clone()), UpdateType::New),
        new_update(Key::Block { cidr }, Value::Block(block)),
        deleted(Key::Block { cidr }),
    ]);

    let block_key = Key::RemoteClusterResource {
        cluster: CLUSTER.to_string(),
        resource: ResourceKey::new("IPAMBlock", "10-65-1-0-26"),
    };
    let expected_block = k8s::IpamBlock {
        metadata: ObjectMeta {
            name: Some("10-65-1-0-26".to_string()),
            ..Default::default()
        },
        spec: k8s::projectcalico::IpamBlockSpec {
            cidr: "10.65.1.0/26".to_string(),
            affinity: Some("host:remote-cluster/node-1".to_string()),
            allocations: vec![Some(0), None],
            unallocated: vec![1],
            attributes: vec![AllocationAttribute {
                handle_id: Some("k8s-pod-network.abc".to_string()),
                secondary: btreemap! {
                    "node".to_string() => "remote-cluster/node-1".to_string(),
                    "pod".to_string() => "pod-a".to_string(),
                },
            }],
            deleted: false,
        },
    };
    assert_eq!(
        updates,
        vec![
            new_update(
                Key::RemoteClusterResource {
                    cluster: CLUSTER.to_string(),
                    resource: ResourceKey::new("IPPool", "default-ipv4-ippool"),
                },
                Value::Resource(Resource::IpPool(pool)),
            ),
            new_update(
                block_key.clone(),
                Value::Resource(Resource::IpamBlock(expected_block)),
            ),
            deleted(block_key),
        ]
    );
}

#[test]
#[should_panic(expected = "unexpected RemoteClusterConfiguration resource")]
fn unexpected_remote_kinds_panic() {
    let rcc = RemoteClusterConfiguration::new("nested", Default::default());
    convert(vec![Update::new(
        KVPair::from_resource(rcc),
        UpdateType::New,
    )]);
}

#[test]
fn remote_resource_types_follow_overlay_routing() {
    let kinds = |mode| {
        FelixRemoteClusterProcessor
            .create_resource_types(mode)
            .into_iter()
            .map(|rt| rt.list)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        kinds(OverlayRoutingMode::Disabled),
        vec![
            ListOptions::resource("WorkloadEndpoint"),
            ListOptions::resource("HostEndpoint"),
            ListOptions::resource("Profile"),
        ]
    );
    assert_eq!(
        kinds(OverlayRoutingMode::Enabled)[3..].to_vec(),
        vec![
            ListOptions::resource("Node"),
            ListOptions::resource("IPPool"),
            ListOptions::Blocks,
        ]
    );
}

#[test]
fn api_config_carries_only_the_datastore_fields() {
    let rcc = RemoteClusterConfiguration::new(
        "cluster-a",
        RemoteClusterConfigurationSpec {
            datastore_type: "etcdv3".to_string(),
            etcd: EtcdConfig {
                endpoints: "https://etcd:2379".to_string(),
                ..Default::default()
            },
            kube: KubeConfig {
                kubeconfig: "/etc/kube/config".to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let config = calico_api_config(&rcc).expect("etcd config must be supported");
    assert_eq!(config.datastore_type, DatastoreType::EtcdV3);
    assert_eq!(config.etcd.endpoints, "https://etcd:2379");
    assert_eq!(config.kube, KubeConfig::default());

    let mut unsupported = rcc;
    unsupported.spec.datastore_type = "consul".to_string();
    assert_eq!(calico_api_config(&unsupported), None);
}

#[test]
fn remote_services_are_wrapped() {
    let key = ResourceKey::namespaced("Service", "default", "web");
    let updates = ServicesRemoteClusterProcessor
        .convert_updates(CLUSTER, vec![deleted(key.clone().into())]);
    assert_eq!(
        updates,
        vec![deleted(Key::RemoteClusterResource {
            cluster: CLUSTER.to_string(),
            resource: key,
        })]
    );
}

#[tokio::test(start_paused = true)]
async fn local_and_remote_endpoints_do_not_collide() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .try_init()
        .ok();

    let remote = MemoryClient::new();
    remote
        .apply(KVPair::from_resource(host_endpoint("eth0", "node2")))
        .unwrap();
    remote
        .apply(KVPair::from_resource(profile_with_rules("default")))
        .unwrap();
    let clients = MemoryClientFactory::default();
    clients.insert("https://remote:2379", remote);

    let local = MemoryClient::new();
    local
        .apply(KVPair::from_resource(host_endpoint("eth0", "node2")))
        .unwrap();
    local
        .apply(KVPair::from_resource(RemoteClusterConfiguration::new(
            CLUSTER,
            RemoteClusterConfigurationSpec {
                datastore_type: "etcdv3".to_string(),
                etcd: EtcdConfig {
                    endpoints: "https://remote:2379".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )))
        .unwrap();

    let (callbacks, mut events) = recorder();
    let syncer = new(
        Arc::new(local.clone()),
        None,
        callbacks,
        FederationBuilder::new(Arc::new(clients)),
    )
    .expect("syncer must be built");
    syncer.start();

    assert_eq!(events.next_status().await, SyncStatus::WaitForDatastore);
    assert_eq!(events.next_status().await, SyncStatus::ResyncInProgress);
    assert_eq!(events.next_status().await, SyncStatus::InSync);
    let (_, updates) = events.settle().await;

    let mut hep_keys = updates
        .iter()
        .filter(|u| matches!(u.key(), Key::HostEndpoint { .. }))
        .map(|u| u.key().clone())
        .collect::<Vec<_>>();
    hep_keys.sort();
    assert_eq!(
        hep_keys,
        vec![
            Key::HostEndpoint {
                hostname: "node2".to_string(),
                endpoint_id: "eth0".to_string(),
            },
            Key::HostEndpoint {
                hostname: "remote-cluster/node2".to_string(),
                endpoint_id: "eth0".to_string(),
            },
        ]
    );

    let rules = updates
        .iter()
        .find(|u| {
            u.key()
                == &Key::ProfileRules {
                    name: "remote-cluster/default".to_string(),
                }
        })
        .expect("remote profile rules must be federated");
    assert_eq!(
        rules.value(),
        Some(&Value::ProfileRules(ProfileRules::default()))
    );

    syncer.stop().await;
}
