use crate::{
    endpoint::RemoteEndpointCallbacks,
    metrics::RemoteClusterMetrics,
    secret::{self, SecretBackend, SecretRef, SecretWatcher},
};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Result};
use calico_syncer_core::{
    k8s::{kinds, OverlayRoutingMode, RemoteClusterConfiguration},
    CalicoApiConfig, Client, ClientFactory, Error, Key, KVPair, RemoteClusterStatusType, Resource,
    ResourceKey, SyncStatus, Syncer, SyncerCallbacks, Update, UpdateType, Value,
};
use calico_syncer_watch::{ResourceType, WatcherSyncer};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

const STOPPING_INCOMPLETE: &str = "Config is incomplete, stopping watch remote";

/// Adapts the federation layer to a particular syncer: which remote
/// configurations it accepts, what it syncs from remotes and how remote
/// updates are merged into the local key space.
pub trait RemoteClusterInterface: Send + Sync + 'static {
    /// Returns the datastore configuration for a remote cluster, or `None` if
    /// the configuration is not usable by this syncer.
    fn get_calico_api_config(&self, rcc: &RemoteClusterConfiguration) -> Option<CalicoApiConfig>;

    fn create_resource_types(&self, overlay_routing_mode: OverlayRoutingMode)
        -> Vec<ResourceType>;

    fn convert_updates(&self, cluster: &str, updates: Vec<Update>) -> Vec<Update>;
}

/// Configures a federation layer.
#[derive(Clone)]
pub struct FederationBuilder {
    clients: Arc<dyn ClientFactory>,
    secrets: Option<Arc<dyn SecretBackend>>,
    metrics: RemoteClusterMetrics,
    retry_interval: Duration,
}

/// Wraps the callbacks of a syncer that includes `RemoteClusterConfiguration`
/// resources, federating the remote clusters they describe.
///
/// Configuration updates are consumed and replaced by `RemoteClusterStatus`
/// updates; all other updates pass through. The local `InSync` status is held
/// back until every remote cluster configured before it has either synced or
/// failed to connect.
#[derive(Clone)]
pub struct RemoteClusterCallbacks {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) callbacks: Arc<dyn SyncerCallbacks>,
    pub(crate) rci: Arc<dyn RemoteClusterInterface>,
    clients: Arc<dyn ClientFactory>,
    secrets: Option<SecretWatcher>,
    metrics: RemoteClusterMetrics,
    retry_interval: Duration,
    state: Mutex<State>,
    /// The number of remotes that hold back the local `InSync`.
    unsynced: watch::Sender<usize>,
}

#[derive(Default)]
struct State {
    remotes: HashMap<ResourceKey, RemoteSyncer>,
    all_rccs_synced: bool,
}

#[derive(Default)]
struct RemoteSyncer {
    syncer: Option<Arc<WatcherSyncer>>,
    client: Option<Arc<dyn Client>>,
    /// Set while the remote is started. Cancelled when it is stopped.
    cancel: Option<CancellationToken>,
    should_block_insync: bool,
    being_stopped: bool,
    needs_removal: bool,
    rcc: Option<RemoteClusterConfiguration>,
    /// The latest configuration received while the remote was being stopped.
    /// Applied once the stop completes.
    deferred_rcc: Option<RemoteClusterConfiguration>,
    /// Set while the configuration is valid.
    datastore_config: Option<CalicoApiConfig>,
}

// === impl FederationBuilder ===

impl FederationBuilder {
    pub fn new(clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            clients,
            secrets: None,
            metrics: RemoteClusterMetrics::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Enables configurations that read their connection details from a
    /// Secret. Without a backend such configurations are incomplete.
    pub fn with_secrets(mut self, backend: Arc<dyn SecretBackend>) -> Self {
        self.secrets = Some(backend);
        self
    }

    pub fn with_metrics(mut self, metrics: RemoteClusterMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the delay between attempts to connect to a remote datastore.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Builds the layer in front of `callbacks`.
    ///
    /// Must be called from within a Tokio runtime when secrets are enabled.
    pub fn build(
        self,
        callbacks: Arc<dyn SyncerCallbacks>,
        rci: impl RemoteClusterInterface,
    ) -> RemoteClusterCallbacks {
        let Self {
            clients,
            secrets,
            metrics,
            retry_interval,
        } = self;
        let (unsynced, _) = watch::channel(0);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let secrets = secrets.map(|backend| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(secret_updates(weak.clone(), rx).in_current_span());
                SecretWatcher::new(backend, tx)
            });
            Inner {
                callbacks,
                rci: Arc::new(rci),
                clients,
                secrets,
                metrics,
                retry_interval,
                state: Mutex::new(State::default()),
                unsynced,
            }
        });
        RemoteClusterCallbacks { inner }
    }
}

async fn secret_updates(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<SecretRef>) {
    while let Some(secret) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.on_secret_updated(&secret).await;
    }
}

// === impl RemoteClusterCallbacks ===

impl RemoteClusterCallbacks {
    #[cfg(test)]
    pub(crate) fn watched_secrets(&self) -> Vec<SecretRef> {
        self.inner
            .secrets
            .as_ref()
            .map(SecretWatcher::watched)
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SyncerCallbacks for RemoteClusterCallbacks {
    async fn on_status_updated(&self, status: SyncStatus) {
        if status != SyncStatus::InSync {
            self.inner.callbacks.on_status_updated(status).await;
            return;
        }

        info!("Local datastore is in sync; waiting for remote clusters");
        let mut unsynced = {
            let mut state = self.inner.state.lock().await;
            state.all_rccs_synced = true;
            self.inner.unsynced.subscribe()
        };
        if *unsynced.borrow_and_update() == 0 {
            self.inner.callbacks.on_status_updated(status).await;
            return;
        }

        // Remotes report in from their own tasks, which must not wait on the
        // caller.
        let callbacks = self.inner.callbacks.clone();
        tokio::spawn(
            async move {
                if unsynced.wait_for(|n| *n == 0).await.is_ok() {
                    info!("Remote clusters are synced");
                    callbacks.on_status_updated(status).await;
                }
            }
            .in_current_span(),
        );
    }

    async fn on_updates(&self, updates: Vec<Update>) {
        let mut passthrough = Vec::with_capacity(updates.len());
        for update in updates {
            let is_rcc = matches!(
                update.key(),
                Key::Resource(key) if key.kind == kinds::REMOTE_CLUSTER_CONFIGURATION
            );
            if is_rcc {
                self.inner.handle_rcc_update(update).await;
            } else {
                passthrough.push(update);
            }
        }
        if !passthrough.is_empty() {
            self.inner.callbacks.on_updates(passthrough).await;
        }
    }

    async fn on_connection_failed(&self, error: &Error) {
        self.inner.callbacks.on_connection_failed(error).await;
    }
}

// === impl Inner ===

impl Inner {
    async fn handle_rcc_update(self: &Arc<Self>, update: Update) {
        let Update { kv, update_type } = update;
        let KVPair { key, value, .. } = kv;
        let Key::Resource(key) = key else {
            return;
        };
        let rcc = match value {
            Some(Value::Resource(Resource::RemoteClusterConfiguration(rcc))) => Some(rcc),
            _ => None,
        };

        let mut state = self.state.lock().await;
        match (update_type, rcc) {
            (UpdateType::New, Some(rcc)) => {
                info!(cluster = %key.name, "Handling new remote cluster configuration");
                // Sent before anything else is done for the remote so that it
                // is the first event for the cluster.
                self.send_status(
                    &key.name,
                    UpdateType::New,
                    RemoteClusterStatusType::Connecting,
                    None,
                )
                .await;
                let state = self.update_rcc(state, &key, rcc, "new RCC").await;
                self.clean_stale_secrets(&state).await;
            }
            (UpdateType::Updated, Some(rcc)) => {
                debug!(cluster = %key.name, "Handling modified remote cluster configuration");
                let state = self.update_rcc(state, &key, rcc, "modified RCC").await;
                self.clean_stale_secrets(&state).await;
            }
            (UpdateType::Deleted, _) => {
                if state.remotes.contains_key(&key) {
                    info!(cluster = %key.name, "Handling deleted remote cluster configuration");
                    state = self.stop_rcc(state, &key, true).await;
                }
                drop(state);
            }
            (update_type, _) => {
                warn!(
                    cluster = %key.name,
                    %update_type,
                    "Ignoring remote cluster configuration update"
                );
            }
        }
    }

    /// Applies a new version of a remote's configuration.
    ///
    /// A change in validity starts or stops the remote. Changes to the
    /// connection of a running remote are not applied; they are reported as
    /// requiring a restart.
    ///
    /// A configuration received while the remote is being stopped is held
    /// until the stop completes and then applied.
    async fn update_rcc<'a>(
        self: &'a Arc<Self>,
        mut state: MutexGuard<'a, State>,
        key: &ResourceKey,
        rcc: RemoteClusterConfiguration,
        source: &'static str,
    ) -> MutexGuard<'a, State> {
        let mut next = Some((rcc, source));
        while let Some((rcc, source)) = next.take() {
            state = self.apply_rcc(state, key, rcc, source).await;
            next = state
                .remotes
                .get_mut(key)
                .filter(|remote| !remote.being_stopped)
                .and_then(|remote| remote.deferred_rcc.take())
                .map(|rcc| (rcc, "deferred RCC"));
        }
        state
    }

    async fn apply_rcc<'a>(
        self: &'a Arc<Self>,
        mut state: MutexGuard<'a, State>,
        key: &ResourceKey,
        rcc: RemoteClusterConfiguration,
        source: &'static str,
    ) -> MutexGuard<'a, State> {
        if let Some(remote) = state.remotes.get_mut(key) {
            if remote.being_stopped {
                debug!(cluster = %key.name, source, "Remote cluster is stopping; deferring update");
                remote.deferred_rcc = Some(rcc);
                return state;
            }
        }

        let existed = state.remotes.contains_key(key);
        if !existed {
            info!(cluster = %key.name, "Adding remote cluster");
            state.remotes.insert(key.clone(), RemoteSyncer::default());
        }

        let config = match self.datastore_config(&rcc).await {
            Ok(Some(config)) => Some(config),
            Ok(None) => {
                warn!(
                    cluster = %key.name,
                    source,
                    "Cluster access secret was not found or the inline datastore config was invalid"
                );
                self.send_status(
                    &key.name,
                    UpdateType::Updated,
                    RemoteClusterStatusType::ConfigIncomplete,
                    None,
                )
                .await;
                None
            }
            Err(error) => {
                warn!(cluster = %key.name, source, %error, "Unable to get datastore config");
                self.send_status(
                    &key.name,
                    UpdateType::Updated,
                    RemoteClusterStatusType::ConfigIncomplete,
                    Some(error.to_string()),
                )
                .await;
                None
            }
        };

        let Some(remote) = state.remotes.get_mut(key) else {
            return state;
        };
        let routing_changed = remote
            .rcc
            .as_ref()
            .map(|r| r.spec.sync_options.overlay_routing_mode)
            != Some(rcc.spec.sync_options.overlay_routing_mode);
        let was_valid = remote.datastore_config.is_some();
        let config_changed = remote.datastore_config != config;
        remote.rcc = Some(rcc);

        if !existed {
            return self.start_remote_syncer(state, key, config);
        }

        match config {
            Some(config) if !was_valid => {
                info!(cluster = %key.name, source, "Remote cluster configuration is now valid");
                self.start_remote_syncer(state, key, Some(config))
            }
            None if was_valid => {
                info!(cluster = %key.name, source, "Remote cluster configuration is no longer valid");
                self.stop_rcc(state, key, false).await
            }
            Some(_) if config_changed || routing_changed => {
                warn!(
                    cluster = %key.name,
                    source,
                    "Restart process to pick up changes to the connection data"
                );
                self.send_status(
                    &key.name,
                    UpdateType::Updated,
                    RemoteClusterStatusType::ConfigChangeRestartRequired,
                    None,
                )
                .await;
                state
            }
            _ => state,
        }
    }

    async fn datastore_config(
        &self,
        rcc: &RemoteClusterConfiguration,
    ) -> Result<Option<CalicoApiConfig>> {
        let Some((namespace, name)) = rcc.spec.access_secret() else {
            return Ok(self.rci.get_calico_api_config(rcc));
        };
        let secrets = self.secrets.as_ref().ok_or_else(|| {
            anyhow!("secret watcher not available, unable to get secrets for cluster access")
        })?;

        let Some(data) = secrets
            .get_secret_data(&SecretRef::new(namespace, name))
            .await?
        else {
            return Ok(None);
        };
        let rcc = RemoteClusterConfiguration {
            metadata: rcc.metadata.clone(),
            spec: secret::spec_from_secret(&data),
        };
        rcc.spec.validate()?;
        Ok(self.rci.get_calico_api_config(&rcc))
    }

    fn start_remote_syncer<'a>(
        self: &'a Arc<Self>,
        mut state: MutexGuard<'a, State>,
        key: &ResourceKey,
        config: Option<CalicoApiConfig>,
    ) -> MutexGuard<'a, State> {
        let Some(config) = config else {
            return state;
        };
        let block = !state.all_rccs_synced;
        let Some(remote) = state.remotes.get_mut(key) else {
            return state;
        };

        let cancel = CancellationToken::new();
        remote.cancel = Some(cancel.clone());
        remote.datastore_config = Some(config.clone());
        if block && !remote.should_block_insync {
            remote.should_block_insync = true;
            self.unsynced.send_modify(|n| *n += 1);
        }

        let span = info_span!("remote", cluster = %key.name);
        tokio::spawn(
            self.clone()
                .create_remote_syncer(key.clone(), config, cancel)
                .instrument(span),
        );
        state
    }

    /// Connects to the remote datastore, retrying until connected or
    /// cancelled, and then starts syncing from it.
    async fn create_remote_syncer(
        self: Arc<Self>,
        key: ResourceKey,
        config: CalicoApiConfig,
        cancel: CancellationToken,
    ) {
        let client = loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Abandoning creation of remote syncer");
                    return;
                }
                result = self.clients.create_client(&config) => result,
            };
            match result {
                Ok(client) => break client,
                Err(error) => {
                    warn!(%error, retry = ?self.retry_interval, "Could not connect to remote cluster");
                    if self.handle_connection_failed(&key, &cancel, &error).await {
                        info!("Abandoning creation of remote syncer");
                        return;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("Abandoning creation of remote syncer");
                            return;
                        }
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }

                    let _state = self.state.lock().await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    self.send_status(
                        &key.name,
                        UpdateType::Updated,
                        RemoteClusterStatusType::Connecting,
                        None,
                    )
                    .await;
                }
            }
        };

        // Checked under the lock so that a stopped remote never gets a syncer.
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() || !state.remotes.contains_key(&key) {
            info!("Abandoning creation of remote syncer");
            if let Err(error) = client.close().await {
                warn!(%error, "Failed to close remote client");
            }
            self.finish_remote(&mut state, &key);
            return;
        }
        let Some(remote) = state.remotes.get_mut(&key) else {
            return;
        };

        info!("Creating remote syncer");
        let routing_mode = remote
            .rcc
            .as_ref()
            .map(|rcc| rcc.spec.sync_options.overlay_routing_mode)
            .unwrap_or_default();
        let resource_types = self.rci.create_resource_types(routing_mode);
        let callbacks = RemoteEndpointCallbacks::new(Arc::downgrade(&self), key.clone(), cancel);
        let syncer = Arc::new(WatcherSyncer::new(
            client.clone(),
            resource_types,
            Arc::new(callbacks),
        ));
        remote.syncer = Some(syncer.clone());
        remote.client = Some(client);
        syncer.start();
    }

    pub(crate) async fn handle_remote_resync(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) {
        let _state = self.state.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        self.send_status(
            &key.name,
            UpdateType::Updated,
            RemoteClusterStatusType::ResyncInProgress,
            None,
        )
        .await;
    }

    /// Reports that a remote is in sync, after which it no longer holds back
    /// the local `InSync`.
    pub(crate) async fn handle_remote_in_sync(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) {
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            info!("Remote cluster deleted; not reporting in-sync");
        } else {
            info!("Remote cluster is in sync");
            self.send_status(
                &key.name,
                UpdateType::Updated,
                RemoteClusterStatusType::InSync,
                None,
            )
            .await;
        }
        self.finish_remote(&mut state, key);
    }

    /// Reports a connection failure, after which the remote no longer holds
    /// back the local `InSync`. Returns true if the remote has been stopped.
    pub(crate) async fn handle_connection_failed(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
        error: &Error,
    ) -> bool {
        let mut state = self.state.lock().await;
        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!("Remote cluster deleted; not reporting connection failure");
        } else {
            info!(%error, "Remote cluster connection failed");
            self.send_status(
                &key.name,
                UpdateType::Updated,
                RemoteClusterStatusType::ConnectionFailed,
                Some(error.to_string()),
            )
            .await;
        }
        self.finish_remote(&mut state, key);
        cancelled
    }

    /// Stops a remote's syncer and closes its client. The remote is then
    /// either removed or, if its configuration merely became invalid, kept
    /// so that it can be restarted.
    ///
    /// The lock is released while the syncer stops since the syncer delivers
    /// its final updates through this layer.
    async fn stop_rcc<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        key: &ResourceKey,
        remove: bool,
    ) -> MutexGuard<'a, State> {
        let Some(remote) = state.remotes.get_mut(key) else {
            return state;
        };
        // Recorded first so that a removal requested during another stop is
        // still carried out.
        if remove {
            remote.needs_removal = true;
        }
        if remote.being_stopped {
            return state;
        }
        remote.being_stopped = true;

        // Cancelled before the lock is released so that the remote reports
        // nothing further.
        if let Some(cancel) = remote.cancel.as_ref() {
            cancel.cancel();
        }
        let syncer = remote.syncer.clone();
        let client = remote.client.clone();
        drop(state);

        if let Some(syncer) = syncer {
            info!(cluster = %key.name, "Stopping remote syncer");
            syncer.stop().await;
        }
        if let Some(client) = client {
            info!(cluster = %key.name, "Closing remote client");
            if let Err(error) = client.close().await {
                warn!(cluster = %key.name, %error, "Failed to close remote client");
            }
        }

        let mut state = self.state.lock().await;
        if let Some(remote) = state.remotes.get_mut(key) {
            remote.being_stopped = false;
            let needs_removal = remote.needs_removal;
            if remote.cancel.take().is_some() {
                remote.syncer = None;
                remote.client = None;
                remote.datastore_config = None;
                self.finish_remote(&mut state, key);
            }

            if needs_removal {
                state.remotes.remove(key);
                // Nothing else is reported for the remote after this.
                debug!(cluster = %key.name, "Removing remote cluster status");
                let update = Update::new(
                    KVPair::deleted(Key::remote_cluster_status(&key.name)),
                    UpdateType::Deleted,
                );
                self.callbacks.on_updates(vec![update]).await;
                self.metrics.remove(&key.name);
            } else {
                self.send_status(
                    &key.name,
                    UpdateType::Updated,
                    RemoteClusterStatusType::ConfigIncomplete,
                    Some(STOPPING_INCOMPLETE.to_string()),
                )
                .await;
            }
        }

        self.clean_stale_secrets(&state).await;
        state
    }

    /// Stops the remote from holding back the local `InSync`.
    fn finish_remote(&self, state: &mut State, key: &ResourceKey) {
        if let Some(remote) = state.remotes.get_mut(key) {
            if remote.should_block_insync {
                debug!(cluster = %key.name, "Remote cluster no longer blocks in-sync");
                remote.should_block_insync = false;
                self.unsynced.send_modify(|n| *n = n.saturating_sub(1));
            }
        }
    }

    async fn on_secret_updated(self: &Arc<Self>, secret: &SecretRef) {
        let mut state = self.state.lock().await;
        let affected = state
            .remotes
            .iter()
            .filter_map(|(key, remote)| {
                let rcc = remote.rcc.as_ref()?;
                let (namespace, name) = rcc.spec.access_secret()?;
                (namespace == secret.namespace && name == secret.name)
                    .then(|| (key.clone(), rcc.clone()))
            })
            .collect::<Vec<_>>();

        for (key, rcc) in affected {
            info!(cluster = %key.name, %secret, "Cluster access secret changed");
            state = self.update_rcc(state, &key, rcc, "secret update").await;
        }
        self.clean_stale_secrets(&state).await;
    }

    /// Stops watching Secrets that no remaining configuration references.
    async fn clean_stale_secrets(&self, state: &State) {
        let Some(secrets) = self.secrets.as_ref() else {
            return;
        };
        let referenced = state
            .remotes
            .values()
            .flat_map(|remote| remote.rcc.iter().chain(remote.deferred_rcc.iter()))
            .filter_map(|rcc| rcc.spec.access_secret())
            .map(|(namespace, name)| SecretRef::new(namespace, name))
            .collect::<Vec<_>>();

        secrets.mark_stale();
        for secret in &referenced {
            if let Err(error) = secrets.get_secret_data(secret).await {
                debug!(%secret, %error, "Failed to refresh secret");
            }
        }
        secrets.sweep_stale();
    }

    async fn send_status(
        &self,
        cluster: &str,
        update_type: UpdateType,
        status: RemoteClusterStatusType,
        error: Option<String>,
    ) {
        debug!(%cluster, %update_type, %status, "Remote cluster status");
        let update = Update::remote_cluster_status(cluster, update_type, status, error);
        self.callbacks.on_updates(vec![update]).await;
        self.metrics.set(cluster, status);
    }
}
