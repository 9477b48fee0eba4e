use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// A host interface (or the host as a whole, when `interfaceName` is `*`)
/// that policy is applied to.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "HostEndpoint",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HostEndpointSpec {
    #[serde(default)]
    pub node: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface_name: String,

    #[serde(default, rename = "expectedIPs", skip_serializing_if = "Vec::is_empty")]
    pub expected_ips: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<EndpointPort>,
}

/// A pod (or other workload) network interface.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "WorkloadEndpoint",
    namespaced,
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEndpointSpec {
    #[serde(default)]
    pub orchestrator: String,

    #[serde(default)]
    pub workload: String,

    #[serde(default)]
    pub node: String,

    #[serde(default, rename = "containerID", skip_serializing_if = "String::is_empty")]
    pub container_id: String,

    #[serde(default)]
    pub pod: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub interface_name: String,

    #[serde(default, rename = "mac", skip_serializing_if = "String::is_empty")]
    pub mac: String,

    #[serde(default, rename = "ipNetworks", skip_serializing_if = "Vec::is_empty")]
    pub ip_networks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<EndpointPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct EndpointPort {
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    pub port: u16,
}
