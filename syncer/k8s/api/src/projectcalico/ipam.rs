use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "IPPool",
    root = "IpPool",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IpPoolSpec {
    pub cidr: String,

    #[serde(default, rename = "vxlanMode", skip_serializing_if = "String::is_empty")]
    pub vxlan_mode: String,

    #[serde(default, rename = "ipipMode", skip_serializing_if = "String::is_empty")]
    pub ipip_mode: String,

    #[serde(default)]
    pub nat_outgoing: bool,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_selector: String,
}

/// An IPAM allocation block. Its name is derived from its CIDR.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "IPAMBlock",
    root = "IpamBlock",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IpamBlockSpec {
    pub cidr: String,

    /// `host:<node>` when the block is affine to a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,

    #[serde(default)]
    pub allocations: Vec<Option<usize>>,

    #[serde(default)]
    pub unallocated: Vec<usize>,

    #[serde(default)]
    pub attributes: Vec<AllocationAttribute>,

    #[serde(default)]
    pub deleted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AllocationAttribute {
    #[serde(default, rename = "handle_id", skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<String>,

    #[serde(default, rename = "secondary", skip_serializing_if = "BTreeMap::is_empty")]
    pub secondary: BTreeMap<String, String>,
}

/// Derives a block's resource name from its CIDR, e.g. `10.0.1.0/26` becomes
/// `10-0-1-0-26`.
pub fn cidr_to_name(cidr: &str) -> String {
    cidr.replace(['.', ':', '/'], "-")
}
