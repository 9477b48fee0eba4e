use crate::federation::Inner;
use calico_syncer_core::{Error, ResourceKey, SyncStatus, SyncerCallbacks, Update};
use std::sync::Weak;
use tokio_util::sync::CancellationToken;

/// Receives the output of a remote cluster's syncer, reporting its progress
/// as the remote's status and merging its updates into the local stream.
pub(crate) struct RemoteEndpointCallbacks {
    federation: Weak<Inner>,
    cluster: ResourceKey,
    cancel: CancellationToken,
}

impl RemoteEndpointCallbacks {
    pub(crate) fn new(
        federation: Weak<Inner>,
        cluster: ResourceKey,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            federation,
            cluster,
            cancel,
        }
    }
}

#[async_trait::async_trait]
impl SyncerCallbacks for RemoteEndpointCallbacks {
    async fn on_status_updated(&self, status: SyncStatus) {
        let Some(federation) = self.federation.upgrade() else {
            return;
        };
        match status {
            SyncStatus::WaitForDatastore => {}
            SyncStatus::ResyncInProgress => {
                federation
                    .handle_remote_resync(&self.cluster, &self.cancel)
                    .await
            }
            SyncStatus::InSync => {
                federation
                    .handle_remote_in_sync(&self.cluster, &self.cancel)
                    .await
            }
        }
    }

    async fn on_updates(&self, updates: Vec<Update>) {
        let Some(federation) = self.federation.upgrade() else {
            return;
        };
        let updates = federation.rci.convert_updates(&self.cluster.name, updates);
        if !updates.is_empty() {
            federation.callbacks.on_updates(updates).await;
        }
    }

    async fn on_connection_failed(&self, error: &Error) {
        if let Some(federation) = self.federation.upgrade() {
            federation
                .handle_connection_failed(&self.cluster, &self.cancel, error)
                .await;
        }
    }
}
