//! Resource kind names as they appear in resource keys.

pub const REMOTE_CLUSTER_CONFIGURATION: &str = "RemoteClusterConfiguration";
pub const HOST_ENDPOINT: &str = "HostEndpoint";
pub const WORKLOAD_ENDPOINT: &str = "WorkloadEndpoint";
pub const PROFILE: &str = "Profile";
pub const NODE: &str = "Node";
pub const IP_POOL: &str = "IPPool";
pub const IPAM_BLOCK: &str = "IPAMBlock";

pub const SERVICE: &str = "Service";
pub const ENDPOINTS: &str = "Endpoints";
