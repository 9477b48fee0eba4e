use calico_syncer_core::{
    Error, Key, RemoteClusterStatusType, SyncStatus, SyncerCallbacks, Update, Value,
};
use std::sync::Arc;
use tracing::warn;

/// Passes everything through to `callbacks`, invoking `on_restart` whenever a
/// remote cluster reports that its configuration changed in a way that needs a
/// restart to take effect.
pub struct RestartMonitor<F> {
    callbacks: Arc<dyn SyncerCallbacks>,
    on_restart: F,
}

impl<F> RestartMonitor<F>
where
    F: Fn(String) + Send + Sync + 'static,
{
    pub fn new(callbacks: Arc<dyn SyncerCallbacks>, on_restart: F) -> Self {
        Self {
            callbacks,
            on_restart,
        }
    }
}

#[async_trait::async_trait]
impl<F> SyncerCallbacks for RestartMonitor<F>
where
    F: Fn(String) + Send + Sync + 'static,
{
    async fn on_status_updated(&self, status: SyncStatus) {
        self.callbacks.on_status_updated(status).await;
    }

    async fn on_updates(&self, updates: Vec<Update>) {
        for update in &updates {
            let Key::RemoteClusterStatus { name } = update.key() else {
                continue;
            };
            let restart = update
                .value()
                .and_then(Value::as_remote_cluster_status)
                .is_some_and(|s| s.status == RemoteClusterStatusType::ConfigChangeRestartRequired);
            if restart {
                let reason = format!("configuration for remote cluster {name} changed");
                warn!(cluster = %name, "Restart required");
                (self.on_restart)(reason);
            }
        }
        self.callbacks.on_updates(updates).await;
    }

    async fn on_connection_failed(&self, error: &Error) {
        self.callbacks.on_connection_failed(error).await;
    }
}
