use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Describes how to reach the datastore of a remote cluster whose endpoints
/// are merged into the local view.
///
/// Connection details are either given inline or read from the Secret named
/// by `clusterAccessSecret`, in which case the inline fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "RemoteClusterConfiguration",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterConfigurationSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datastore_type: String,

    #[serde(flatten)]
    pub etcd: EtcdConfig,

    #[serde(flatten)]
    pub kube: KubeConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_access_secret: Option<ObjectReference>,

    #[serde(default)]
    pub sync_options: RemoteClusterSyncOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EtcdConfig {
    #[serde(rename = "etcdEndpoints", default, skip_serializing_if = "String::is_empty")]
    pub endpoints: String,
    #[serde(rename = "etcdUsername", default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(rename = "etcdPassword", default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(rename = "etcdKeyFile", default, skip_serializing_if = "String::is_empty")]
    pub key_file: String,
    #[serde(rename = "etcdCertFile", default, skip_serializing_if = "String::is_empty")]
    pub cert_file: String,
    #[serde(rename = "etcdCACertFile", default, skip_serializing_if = "String::is_empty")]
    pub ca_cert_file: String,
    #[serde(rename = "etcdKey", default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(rename = "etcdCert", default, skip_serializing_if = "String::is_empty")]
    pub cert: String,
    #[serde(rename = "etcdCACert", default, skip_serializing_if = "String::is_empty")]
    pub ca_cert: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct KubeConfig {
    #[serde(rename = "kubeconfig", default, skip_serializing_if = "String::is_empty")]
    pub kubeconfig: String,
    #[serde(rename = "k8sAPIEndpoint", default, skip_serializing_if = "String::is_empty")]
    pub api_endpoint: String,
    #[serde(rename = "k8sKeyFile", default, skip_serializing_if = "String::is_empty")]
    pub key_file: String,
    #[serde(rename = "k8sCertFile", default, skip_serializing_if = "String::is_empty")]
    pub cert_file: String,
    #[serde(rename = "k8sCAFile", default, skip_serializing_if = "String::is_empty")]
    pub ca_file: String,
    #[serde(rename = "k8sAPIToken", default, skip_serializing_if = "String::is_empty")]
    pub api_token: String,
    #[serde(rename = "k8sInsecureSkipTLSVerify", default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(rename = "kubeconfigInline", default, skip_serializing_if = "String::is_empty")]
    pub kubeconfig_inline: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteClusterSyncOptions {
    #[serde(default)]
    pub overlay_routing_mode: OverlayRoutingMode,
}

/// Controls whether a remote cluster's nodes, pools and blocks are synced so
/// that traffic to it can be routed over the overlay.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OverlayRoutingMode {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to validate Field: {field}")]
pub struct ValidationError {
    pub field: &'static str,
}

pub const DATASTORE_ETCD_V3: &str = "etcdv3";
pub const DATASTORE_KUBERNETES: &str = "kubernetes";

// === impl RemoteClusterConfigurationSpec ===

impl RemoteClusterConfigurationSpec {
    /// Checks the connection fields, as is required before a spec assembled
    /// from Secret data is used.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.datastore_type.as_str() {
            DATASTORE_ETCD_V3 => {
                if self.etcd.endpoints.trim().is_empty() {
                    return Err(ValidationError {
                        field: "EtcdEndpoints",
                    });
                }
            }
            DATASTORE_KUBERNETES => {
                if self.kube.kubeconfig.is_empty()
                    && self.kube.kubeconfig_inline.is_empty()
                    && self.kube.api_endpoint.is_empty()
                {
                    return Err(ValidationError {
                        field: "Kubeconfig",
                    });
                }
            }
            _ => {
                return Err(ValidationError {
                    field: "DatastoreType",
                })
            }
        }

        if self
            .etcd
            .endpoints
            .split(',')
            .map(str::trim)
            .any(|e| !e.is_empty() && !e.contains("://"))
        {
            return Err(ValidationError {
                field: "EtcdEndpoints",
            });
        }

        Ok(())
    }

    /// Returns the `(namespace, name)` of the access secret, if one is set.
    pub fn access_secret(&self) -> Option<(&str, &str)> {
        let secret = self.cluster_access_secret.as_ref()?;
        let name = secret.name.as_deref()?;
        Some((secret.namespace.as_deref().unwrap_or_default(), name))
    }
}
