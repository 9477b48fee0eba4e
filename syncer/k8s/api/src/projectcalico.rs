//! projectcalico.org/v3 resources consumed by the syncers.

pub mod endpoint;
pub mod ipam;
pub mod node;
pub mod profile;
pub mod remote_cluster_configuration;

pub use self::{
    endpoint::{EndpointPort, HostEndpoint, HostEndpointSpec, WorkloadEndpoint, WorkloadEndpointSpec},
    ipam::{cidr_to_name, AllocationAttribute, IpPool, IpPoolSpec, IpamBlock, IpamBlockSpec},
    node::{Node, NodeBgpSpec, NodeSpec, NodeStatus, NodeWireguardSpec},
    profile::{EntityRule, Profile, ProfileSpec, Rule},
    remote_cluster_configuration::{
        OverlayRoutingMode, RemoteClusterConfiguration, RemoteClusterConfigurationSpec,
        EtcdConfig, KubeConfig, RemoteClusterSyncOptions, ValidationError, DATASTORE_ETCD_V3,
        DATASTORE_KUBERNETES,
    },
};

pub const GROUP: &str = "projectcalico.org";
pub const VERSION: &str = "v3";
