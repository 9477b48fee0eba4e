use ipnet::IpNet;
use std::fmt;

/// Identifies a versioned value in a datastore.
///
/// `Resource` keys name v3 API objects. The remaining variants name values in
/// the v1 (dataplane) model that update processors derive from them, plus the
/// synthetic keys produced by remote cluster federation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Resource(ResourceKey),

    /// A resource owned by a remote cluster that is kept out of the local
    /// key namespace.
    RemoteClusterResource {
        cluster: String,
        resource: ResourceKey,
    },

    /// The connection status of a remote cluster.
    RemoteClusterStatus {
        name: String,
    },

    HostEndpoint {
        hostname: String,
        endpoint_id: String,
    },

    WorkloadEndpoint {
        hostname: String,
        orchestrator_id: String,
        workload_id: String,
        endpoint_id: String,
    },

    ProfileRules {
        name: String,
    },

    ProfileLabels {
        name: String,
    },

    HostIp {
        hostname: String,
    },

    HostConfig {
        hostname: String,
        name: String,
    },

    Wireguard {
        node_name: String,
    },

    Block {
        cidr: IpNet,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

// === impl Key ===

impl Key {
    pub fn remote_cluster_status(name: impl ToString) -> Self {
        Self::RemoteClusterStatus {
            name: name.to_string(),
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceKey> {
        match self {
            Self::Resource(key) => Some(key),
            _ => None,
        }
    }

    /// The resource kind for `Resource` keys, or a fixed name for each of the
    /// other variants.
    pub fn kind(&self) -> &str {
        match self {
            Self::Resource(key) => &key.kind,
            Self::RemoteClusterResource { resource, .. } => &resource.kind,
            Self::RemoteClusterStatus { .. } => "RemoteClusterStatus",
            Self::HostEndpoint { .. } => "HostEndpoint",
            Self::WorkloadEndpoint { .. } => "WorkloadEndpoint",
            Self::ProfileRules { .. } => "ProfileRules",
            Self::ProfileLabels { .. } => "ProfileLabels",
            Self::HostIp { .. } => "HostIP",
            Self::HostConfig { .. } => "HostConfig",
            Self::Wireguard { .. } => "Wireguard",
            Self::Block { .. } => "Block",
        }
    }
}

impl From<ResourceKey> for Key {
    fn from(key: ResourceKey) -> Self {
        Self::Resource(key)
    }
}

/// Formats the key as its default datastore path.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(key) => fmt::Display::fmt(key, f),
            Self::RemoteClusterResource { cluster, resource } => {
                write!(f, "/calico/remotecluster/{cluster}{resource}")
            }
            Self::RemoteClusterStatus { name } => {
                write!(f, "/calico/felix/v2/remotecluster/{name}/status")
            }
            Self::HostEndpoint {
                hostname,
                endpoint_id,
            } => write!(f, "/calico/v1/host/{hostname}/endpoint/{endpoint_id}"),
            Self::WorkloadEndpoint {
                hostname,
                orchestrator_id,
                workload_id,
                endpoint_id,
            } => write!(
                f,
                "/calico/v1/host/{hostname}/workload/{orchestrator_id}/{}/endpoint/{endpoint_id}",
                workload_id.replace('/', "%2f")
            ),
            Self::ProfileRules { name } => write!(f, "/calico/v1/policy/profile/{name}/rules"),
            Self::ProfileLabels { name } => write!(f, "/calico/v1/policy/profile/{name}/labels"),
            Self::HostIp { hostname } => write!(f, "/calico/v1/host/{hostname}/bird_ip"),
            Self::HostConfig { hostname, name } => {
                write!(f, "/calico/v1/host/{hostname}/config/{name}")
            }
            Self::Wireguard { node_name } => write!(f, "/calico/v1/host/{node_name}/wireguard"),
            Self::Block { cidr } => {
                let family = match cidr {
                    IpNet::V4(_) => "ipv4",
                    IpNet::V6(_) => "ipv6",
                };
                write!(
                    f,
                    "/calico/ipam/v2/assignment/{family}/block/{}",
                    cidr.to_string().replace('/', "-")
                )
            }
        }
    }
}

// === impl ResourceKey ===

impl ResourceKey {
    pub fn new(kind: impl ToString, name: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespaced(kind: impl ToString, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.to_lowercase();
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "/calico/resources/v3/projectcalico.org/{kind}/{ns}/{}", self.name),
            None => write!(f, "/calico/resources/v3/projectcalico.org/{kind}/{}", self.name),
        }
    }
}
