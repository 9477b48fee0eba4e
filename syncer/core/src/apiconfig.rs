//! Connection configuration for a Calico datastore.

use crate::error::Error;
use calico_syncer_k8s_api::projectcalico::{DATASTORE_ETCD_V3, DATASTORE_KUBERNETES};
use std::{fmt, str::FromStr};

pub use calico_syncer_k8s_api::projectcalico::{EtcdConfig, KubeConfig};

/// Everything needed to build a client for a datastore.
///
/// Two configs that compare equal connect to the same datastore in the same
/// way.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CalicoApiConfig {
    pub datastore_type: DatastoreType,
    pub etcd: EtcdConfig,
    pub kube: KubeConfig,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DatastoreType {
    #[default]
    EtcdV3,
    Kubernetes,
}

// === impl DatastoreType ===

impl FromStr for DatastoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            DATASTORE_ETCD_V3 => Ok(Self::EtcdV3),
            DATASTORE_KUBERNETES => Ok(Self::Kubernetes),
            s => Err(Error::InvalidConfig(format!("unknown datastore type: {s}"))),
        }
    }
}

impl fmt::Display for DatastoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EtcdV3 => f.write_str(DATASTORE_ETCD_V3),
            Self::Kubernetes => f.write_str(DATASTORE_KUBERNETES),
        }
    }
}
