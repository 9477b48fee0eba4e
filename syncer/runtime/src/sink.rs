use calico_syncer_core::{Error, Key, SyncStatus, SyncerCallbacks, Update, UpdateType, Value};
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use tracing::{debug, info, warn};

/// Logs a syncer's output and counts it.
pub(crate) struct LogSink {
    metrics: SinkMetrics,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SinkMetrics {
    updates: Family<UpdateLabels, Counter>,
    in_sync: Gauge,
    connection_failures: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpdateLabels {
    update_type: UpdateTypeLabel,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum UpdateTypeLabel {
    Unknown,
    New,
    Updated,
    Deleted,
}

// === impl SinkMetrics ===

impl SinkMetrics {
    pub(crate) fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "updates",
            "Count of updates delivered by the syncer",
            metrics.updates.clone(),
        );
        prom.register(
            "in_sync",
            "Whether the syncer has delivered a complete snapshot",
            metrics.in_sync.clone(),
        );
        prom.register(
            "connection_failures",
            "Count of failures to reach the local datastore",
            metrics.connection_failures.clone(),
        );
        metrics
    }

    #[cfg(test)]
    pub(crate) fn updates(&self, update_type: UpdateType) -> u64 {
        self.updates.get_or_create(&UpdateLabels::from(update_type)).get()
    }

    #[cfg(test)]
    pub(crate) fn in_sync(&self) -> i64 {
        self.in_sync.get()
    }

    #[cfg(test)]
    pub(crate) fn connection_failures(&self) -> u64 {
        self.connection_failures.get()
    }
}

impl From<UpdateType> for UpdateLabels {
    fn from(update_type: UpdateType) -> Self {
        let update_type = match update_type {
            UpdateType::Unknown => UpdateTypeLabel::Unknown,
            UpdateType::New => UpdateTypeLabel::New,
            UpdateType::Updated => UpdateTypeLabel::Updated,
            UpdateType::Deleted => UpdateTypeLabel::Deleted,
        };
        Self { update_type }
    }
}

// === impl LogSink ===

impl LogSink {
    pub(crate) fn new(metrics: SinkMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait::async_trait]
impl SyncerCallbacks for LogSink {
    async fn on_status_updated(&self, status: SyncStatus) {
        info!(%status, "Sync status changed");
        self.metrics
            .in_sync
            .set((status == SyncStatus::InSync).into());
    }

    async fn on_updates(&self, updates: Vec<Update>) {
        for update in &updates {
            self.metrics
                .updates
                .get_or_create(&update.update_type.into())
                .inc();

            if let Key::RemoteClusterStatus { name } = update.key() {
                match update.value().and_then(Value::as_remote_cluster_status) {
                    Some(status) => match status.error.as_deref() {
                        Some(error) => {
                            warn!(cluster = %name, status = %status.status, %error, "Remote cluster status")
                        }
                        None => info!(cluster = %name, status = %status.status, "Remote cluster status"),
                    },
                    None => info!(cluster = %name, "Remote cluster removed"),
                }
                continue;
            }
            debug!(key = %update.key(), update_type = %update.update_type, "Update");
        }
    }

    async fn on_connection_failed(&self, error: &Error) {
        self.metrics.connection_failures.inc();
        warn!(%error, "Failed to reach the datastore");
    }
}
