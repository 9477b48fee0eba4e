//! Update processors that convert v3 resources into the v1 model Felix
//! consumes.

use ahash::AHashMap as HashMap;
use calico_syncer_core::{
    k8s::{self, kinds},
    EndpointPort, Error, HostEndpoint, IpNet, KVPair, Key, ProfileRules, Resource,
    UpdateProcessor, Value, Wireguard, WorkloadEndpoint,
};
use std::net::IpAddr;

const NAMESPACE_LABEL: &str = "projectcalico.org/namespace";
const ORCHESTRATOR_LABEL: &str = "projectcalico.org/orchestrator";

const NODE_IP_CONFIG: &str = "NodeIP";
const VXLAN_TUNNEL_ADDR_CONFIG: &str = "IPv4VXLANTunnelAddr";

/// Converts resources of one kind with a stateless function, remembering the
/// keys derived from each resource so that they can be deleted when the
/// resource is deleted or no longer derives them.
pub struct ConversionProcessor<F> {
    kind: &'static str,
    convert: F,
    derived: HashMap<Key, Vec<Key>>,
}

pub fn host_endpoint() -> impl UpdateProcessor {
    ConversionProcessor::new(kinds::HOST_ENDPOINT, |r: &Resource| match r {
        Resource::HostEndpoint(hep) => convert_host_endpoint(hep),
        _ => Ok(vec![]),
    })
}

pub fn workload_endpoint() -> impl UpdateProcessor {
    ConversionProcessor::new(kinds::WORKLOAD_ENDPOINT, |r: &Resource| match r {
        Resource::WorkloadEndpoint(wep) => convert_workload_endpoint(wep),
        _ => Ok(vec![]),
    })
}

pub fn profile() -> impl UpdateProcessor {
    ConversionProcessor::new(kinds::PROFILE, |r: &Resource| match r {
        Resource::Profile(profile) => Ok(convert_profile(profile)),
        _ => Ok(vec![]),
    })
}

pub fn node() -> impl UpdateProcessor {
    ConversionProcessor::new(kinds::NODE, |r: &Resource| match r {
        Resource::Node(node) => convert_node(node),
        _ => Ok(vec![]),
    })
}

// === impl ConversionProcessor ===

impl<F> ConversionProcessor<F>
where
    F: Fn(&Resource) -> Result<Vec<KVPair>, Error> + Send + 'static,
{
    pub fn new(kind: &'static str, convert: F) -> Self {
        Self {
            kind,
            convert,
            derived: HashMap::default(),
        }
    }
}

impl<F> UpdateProcessor for ConversionProcessor<F>
where
    F: Fn(&Resource) -> Result<Vec<KVPair>, Error> + Send + 'static,
{
    fn process(&mut self, kv: &KVPair) -> Result<Vec<KVPair>, Error> {
        let Some(value) = kv.value.as_ref() else {
            let previous = self.derived.remove(&kv.key).unwrap_or_default();
            return Ok(previous
                .into_iter()
                .map(|key| KVPair::deleted(key).with_revision(&kv.revision))
                .collect());
        };

        let resource = match value {
            Value::Resource(resource) if resource.kind() == self.kind => resource,
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "expected a {} resource at {}",
                    self.kind, kv.key
                )))
            }
        };

        let kvs = (self.convert)(resource)?
            .into_iter()
            .map(|derived| derived.with_revision(&kv.revision))
            .collect::<Vec<_>>();
        let keys = kvs.iter().map(|kv| kv.key.clone()).collect::<Vec<_>>();
        let previous = self.derived.insert(kv.key.clone(), keys).unwrap_or_default();

        let mut updates = previous
            .into_iter()
            .filter(|key| !kvs.iter().any(|kv| kv.key == *key))
            .map(|key| KVPair::deleted(key).with_revision(&kv.revision))
            .collect::<Vec<_>>();
        updates.extend(kvs);
        Ok(updates)
    }

    fn on_syncer_starting(&mut self) {
        self.derived.clear();
    }
}

fn convert_host_endpoint(hep: &k8s::HostEndpoint) -> Result<Vec<KVPair>, Error> {
    let name = hep.metadata.name.clone().unwrap_or_default();
    if hep.spec.node.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "host endpoint {name} has no node"
        )));
    }

    let mut expected_ipv4_addrs = Vec::new();
    let mut expected_ipv6_addrs = Vec::new();
    for ip in &hep.spec.expected_ips {
        match ip.parse::<IpAddr>() {
            Ok(ip @ IpAddr::V4(_)) => expected_ipv4_addrs.push(ip),
            Ok(ip @ IpAddr::V6(_)) => expected_ipv6_addrs.push(ip),
            Err(_) => {
                return Err(Error::InvalidConfig(format!(
                    "host endpoint {name} has an invalid expected IP: {ip}"
                )))
            }
        }
    }

    let key = Key::HostEndpoint {
        hostname: hep.spec.node.clone(),
        endpoint_id: name,
    };
    let value = HostEndpoint {
        name: match hep.spec.interface_name.as_str() {
            "*" => String::new(),
            iface => iface.to_string(),
        },
        expected_ipv4_addrs,
        expected_ipv6_addrs,
        labels: hep.metadata.labels.clone().unwrap_or_default(),
        profile_ids: hep.spec.profiles.clone(),
        ports: sorted_ports(&hep.spec.ports),
    };
    Ok(vec![KVPair::new(key, Value::HostEndpoint(value))])
}

fn convert_workload_endpoint(wep: &k8s::WorkloadEndpoint) -> Result<Vec<KVPair>, Error> {
    let name = wep.metadata.name.clone().unwrap_or_default();
    let namespace = wep.metadata.namespace.clone().unwrap_or_default();

    let mut ipv4_nets = Vec::new();
    let mut ipv6_nets = Vec::new();
    for net in &wep.spec.ip_networks {
        match net.parse::<IpNet>() {
            Ok(net @ IpNet::V4(_)) => ipv4_nets.push(net),
            Ok(net @ IpNet::V6(_)) => ipv6_nets.push(net),
            Err(_) => {
                return Err(Error::InvalidConfig(format!(
                    "workload endpoint {namespace}/{name} has an invalid IP network: {net}"
                )))
            }
        }
    }

    let workload = if wep.spec.pod.is_empty() {
        &wep.spec.workload
    } else {
        &wep.spec.pod
    };
    let key = Key::WorkloadEndpoint {
        hostname: wep.spec.node.clone(),
        orchestrator_id: wep.spec.orchestrator.clone(),
        workload_id: format!("{namespace}/{workload}"),
        endpoint_id: wep.spec.endpoint.clone(),
    };

    let mut labels = wep.metadata.labels.clone().unwrap_or_default();
    labels.insert(NAMESPACE_LABEL.to_string(), namespace.clone());
    labels.insert(ORCHESTRATOR_LABEL.to_string(), wep.spec.orchestrator.clone());
    let value = WorkloadEndpoint {
        state: "active".to_string(),
        name: wep.spec.interface_name.clone(),
        mac: (!wep.spec.mac.is_empty()).then(|| wep.spec.mac.clone()),
        profile_ids: wep.spec.profiles.clone(),
        ipv4_nets,
        ipv6_nets,
        labels,
        ports: sorted_ports(&wep.spec.ports),
    };
    Ok(vec![KVPair::new(key, Value::WorkloadEndpoint(value))])
}

/// A profile yields its rules, the profile itself and, when it applies any,
/// its labels.
fn convert_profile(profile: &k8s::Profile) -> Vec<KVPair> {
    let name = profile.metadata.name.clone().unwrap_or_default();
    let mut kvs = vec![
        KVPair::new(
            Key::ProfileRules { name: name.clone() },
            Value::ProfileRules(ProfileRules {
                inbound_rules: profile.spec.ingress.clone(),
                outbound_rules: profile.spec.egress.clone(),
            }),
        ),
        KVPair::from_resource(profile.clone()),
    ];
    if !profile.spec.labels_to_apply.is_empty() {
        kvs.push(KVPair::new(
            Key::ProfileLabels { name },
            Value::Labels(profile.spec.labels_to_apply.clone()),
        ));
    }
    kvs
}

fn convert_node(node: &k8s::Node) -> Result<Vec<KVPair>, Error> {
    let hostname = node.metadata.name.clone().unwrap_or_default();
    let mut kvs = Vec::new();

    if let Some(addr) = node.ipv4_address() {
        let ip = addr.parse::<IpAddr>().map_err(|_| {
            Error::InvalidConfig(format!("node {hostname} has an invalid IPv4 address: {addr}"))
        })?;
        kvs.push(KVPair::new(
            Key::HostIp {
                hostname: hostname.clone(),
            },
            Value::HostIp(ip),
        ));
        kvs.push(KVPair::new(
            Key::HostConfig {
                hostname: hostname.clone(),
                name: NODE_IP_CONFIG.to_string(),
            },
            Value::Config(ip.to_string()),
        ));
    }

    kvs.push(KVPair::from_resource(node.clone()));

    let public_key = node
        .status
        .as_ref()
        .map(|s| s.wireguard_public_key.clone())
        .unwrap_or_default();
    let interface_ipv4_addr = node
        .spec
        .wireguard
        .as_ref()
        .and_then(|wg| wg.interface_ipv4_address.parse::<IpAddr>().ok());
    if interface_ipv4_addr.is_some() || !public_key.is_empty() {
        kvs.push(KVPair::new(
            Key::Wireguard {
                node_name: hostname.clone(),
            },
            Value::Wireguard(Wireguard {
                interface_ipv4_addr,
                public_key,
            }),
        ));
    }

    if !node.spec.ipv4_vxlan_tunnel_addr.is_empty() {
        kvs.push(KVPair::new(
            Key::HostConfig {
                hostname,
                name: VXLAN_TUNNEL_ADDR_CONFIG.to_string(),
            },
            Value::Config(node.spec.ipv4_vxlan_tunnel_addr.clone()),
        ));
    }

    Ok(kvs)
}

fn sorted_ports(ports: &[EndpointPort]) -> Vec<EndpointPort> {
    let mut ports = ports.to_vec();
    ports.sort();
    ports
}
