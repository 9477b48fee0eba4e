use calico_syncer_core::RemoteClusterStatusType;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};

/// Reports the connection status of each remote cluster as a gauge.
///
/// Handles are cheap to clone and share the same series, so a single
/// registration may be shared by every federation layer in the process.
#[derive(Clone, Debug, Default)]
pub struct RemoteClusterMetrics {
    status: Family<ClusterLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ClusterLabels {
    remote_cluster_name: String,
}

impl RemoteClusterMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let status = Family::default();
        prom.register(
            "remote_cluster_connection_status",
            "0-NotConnecting, 1-Connecting, 2-InSync, 3-ReSyncInProgress, 4-ConfigChangeRestartRequired, 5-ConfigInComplete",
            status.clone(),
        );
        Self { status }
    }

    pub(crate) fn set(&self, cluster: &str, status: RemoteClusterStatusType) {
        self.status.get_or_create(&labels(cluster)).set(value(status));
    }

    pub(crate) fn remove(&self, cluster: &str) {
        self.status.remove(&labels(cluster));
    }
}

fn labels(cluster: &str) -> ClusterLabels {
    ClusterLabels {
        remote_cluster_name: cluster.to_lowercase(),
    }
}

fn value(status: RemoteClusterStatusType) -> i64 {
    match status {
        RemoteClusterStatusType::ConnectionFailed => 0,
        RemoteClusterStatusType::Connecting => 1,
        RemoteClusterStatusType::InSync => 2,
        RemoteClusterStatusType::ResyncInProgress => 3,
        RemoteClusterStatusType::ConfigChangeRestartRequired => 4,
        RemoteClusterStatusType::ConfigIncomplete => 5,
    }
}
