use crate::key::{Key, ResourceKey};
use calico_syncer_k8s_api::{self as k8s, kinds, ObjectMeta, Resource as _};
use ipnet::IpNet;
use std::{collections::BTreeMap, fmt, net::IpAddr, time::Duration};

pub use calico_syncer_k8s_api::projectcalico::{AllocationAttribute, EndpointPort, Rule};

/// A key, its value and the datastore revision at which it was observed.
///
/// A pair without a value describes a deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct KVPair {
    pub key: Key,
    pub value: Option<Value>,
    pub revision: String,
    pub ttl: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Resource(Resource),
    RemoteClusterStatus(RemoteClusterStatus),
    HostEndpoint(HostEndpoint),
    WorkloadEndpoint(WorkloadEndpoint),
    ProfileRules(ProfileRules),
    Labels(BTreeMap<String, String>),
    HostIp(IpAddr),
    /// A per-host configuration parameter.
    Config(String),
    Wireguard(Wireguard),
    Block(AllocationBlock),
}

/// A change to a single key as delivered to syncer callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub kv: KVPair,
    pub update_type: UpdateType,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdateType {
    #[default]
    Unknown,
    New,
    Updated,
    Deleted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// No datastore has been reached yet.
    WaitForDatastore,
    /// A full snapshot is being delivered.
    ResyncInProgress,
    /// Every watched resource type has delivered its full snapshot.
    InSync,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteClusterStatus {
    pub status: RemoteClusterStatusType,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RemoteClusterStatusType {
    ConnectionFailed,
    Connecting,
    InSync,
    ResyncInProgress,
    ConfigChangeRestartRequired,
    ConfigIncomplete,
}

/// A v3 API object carried as a value.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    RemoteClusterConfiguration(k8s::RemoteClusterConfiguration),
    HostEndpoint(k8s::HostEndpoint),
    WorkloadEndpoint(k8s::WorkloadEndpoint),
    Profile(k8s::Profile),
    Node(k8s::Node),
    IpPool(k8s::IpPool),
    IpamBlock(k8s::IpamBlock),
    Service(k8s::Service),
    Endpoints(k8s::Endpoints),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostEndpoint {
    /// The interface name, or empty when the endpoint matches all of a host's
    /// interfaces by IP.
    pub name: String,
    pub expected_ipv4_addrs: Vec<IpAddr>,
    pub expected_ipv6_addrs: Vec<IpAddr>,
    pub labels: BTreeMap<String, String>,
    pub profile_ids: Vec<String>,
    pub ports: Vec<EndpointPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadEndpoint {
    pub state: String,
    pub name: String,
    pub mac: Option<String>,
    pub profile_ids: Vec<String>,
    pub ipv4_nets: Vec<IpNet>,
    pub ipv6_nets: Vec<IpNet>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<EndpointPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileRules {
    pub inbound_rules: Vec<Rule>,
    pub outbound_rules: Vec<Rule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Wireguard {
    pub interface_ipv4_addr: Option<IpAddr>,
    pub public_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationBlock {
    pub cidr: IpNet,
    /// `host:<node>` when the block is affine to a node.
    pub affinity: Option<String>,
    pub allocations: Vec<Option<usize>>,
    pub unallocated: Vec<usize>,
    pub attributes: Vec<AllocationAttribute>,
    pub deleted: bool,
}

// === impl KVPair ===

impl KVPair {
    pub fn new(key: impl Into<Key>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            revision: String::new(),
            ttl: None,
        }
    }

    pub fn deleted(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            value: None,
            revision: String::new(),
            ttl: None,
        }
    }

    /// Builds a pair for a v3 object, keyed by its kind, namespace and name
    /// and versioned by its resourceVersion.
    pub fn from_resource(resource: impl Into<Resource>) -> Self {
        let resource = resource.into();
        let revision = resource.meta().resource_version.clone().unwrap_or_default();
        Self {
            key: Key::Resource(resource.key()),
            value: Some(Value::Resource(resource)),
            revision,
            ttl: None,
        }
    }

    pub fn with_revision(mut self, revision: impl ToString) -> Self {
        self.revision = revision.to_string();
        self
    }

    pub fn is_deletion(&self) -> bool {
        self.value.is_none()
    }
}

// === impl Value ===

impl Value {
    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_remote_cluster_status(&self) -> Option<&RemoteClusterStatus> {
        match self {
            Self::RemoteClusterStatus(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        Self::Resource(resource)
    }
}

impl From<RemoteClusterStatus> for Value {
    fn from(status: RemoteClusterStatus) -> Self {
        Self::RemoteClusterStatus(status)
    }
}

// === impl Update ===

impl Update {
    pub fn new(kv: KVPair, update_type: UpdateType) -> Self {
        Self { kv, update_type }
    }

    pub fn key(&self) -> &Key {
        &self.kv.key
    }

    pub fn value(&self) -> Option<&Value> {
        self.kv.value.as_ref()
    }

    /// Builds a status update for the named remote cluster. Deletions carry
    /// no value.
    pub fn remote_cluster_status(
        name: impl ToString,
        update_type: UpdateType,
        status: RemoteClusterStatusType,
        error: Option<String>,
    ) -> Self {
        let key = Key::remote_cluster_status(name);
        let kv = match update_type {
            UpdateType::Deleted => KVPair::deleted(key),
            _ => KVPair::new(key, RemoteClusterStatus { status, error }.into()),
        };
        Self { kv, update_type }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("UpdateTypeKVUnknown"),
            Self::New => f.write_str("UpdateTypeKVNew"),
            Self::Updated => f.write_str("UpdateTypeKVUpdated"),
            Self::Deleted => f.write_str("UpdateTypeKVDeleted"),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitForDatastore => f.write_str("wait-for-ready"),
            Self::ResyncInProgress => f.write_str("resync"),
            Self::InSync => f.write_str("in-sync"),
        }
    }
}

// === impl RemoteClusterStatus ===

impl RemoteClusterStatus {
    pub fn new(status: RemoteClusterStatusType) -> Self {
        Self {
            status,
            error: None,
        }
    }
}

impl fmt::Display for RemoteClusterStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => f.write_str("ConnectionFailed"),
            Self::Connecting => f.write_str("Connecting"),
            Self::InSync => f.write_str("InSync"),
            Self::ResyncInProgress => f.write_str("ResyncInProgress"),
            Self::ConfigChangeRestartRequired => f.write_str("ConfigChangeRestartRequired"),
            Self::ConfigIncomplete => f.write_str("ConfigIncomplete"),
        }
    }
}

// === impl Resource ===

macro_rules! resources {
    ($($variant:ident($ty:ty) => $kind:expr,)+) => {
        impl Resource {
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $kind,)+
                }
            }

            pub fn meta(&self) -> &ObjectMeta {
                match self {
                    $(Self::$variant(r) => r.meta(),)+
                }
            }

            pub fn meta_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(Self::$variant(r) => r.meta_mut(),)+
                }
            }
        }

        $(
            impl From<$ty> for Resource {
                fn from(resource: $ty) -> Self {
                    Self::$variant(resource)
                }
            }
        )+
    };
}

resources! {
    RemoteClusterConfiguration(k8s::RemoteClusterConfiguration) => kinds::REMOTE_CLUSTER_CONFIGURATION,
    HostEndpoint(k8s::HostEndpoint) => kinds::HOST_ENDPOINT,
    WorkloadEndpoint(k8s::WorkloadEndpoint) => kinds::WORKLOAD_ENDPOINT,
    Profile(k8s::Profile) => kinds::PROFILE,
    Node(k8s::Node) => kinds::NODE,
    IpPool(k8s::IpPool) => kinds::IP_POOL,
    IpamBlock(k8s::IpamBlock) => kinds::IPAM_BLOCK,
    Service(k8s::Service) => kinds::SERVICE,
    Endpoints(k8s::Endpoints) => kinds::ENDPOINTS,
}

impl Resource {
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind().to_string(),
            namespace: self.namespace().map(ToString::to_string),
            name: self.name().to_string(),
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.meta().labels.clone().unwrap_or_default()
    }
}
