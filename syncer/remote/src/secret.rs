//! Watches the Secrets that hold remote cluster access configuration.

use ahash::AHashMap as HashMap;
use calico_syncer_core::{
    k8s::projectcalico::{EtcdConfig, KubeConfig, RemoteClusterConfigurationSpec},
    Error,
};
use futures::{prelude::*, stream::BoxStream};
use parking_lot::Mutex;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, info_span, Instrument};

pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretEvent {
    Applied(SecretData),
    Deleted,
}

/// Reads and watches individual Secrets.
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync + 'static {
    /// Returns the Secret's data, or `None` if it does not exist.
    async fn get(&self, secret: &SecretRef) -> Result<Option<SecretData>, Error>;

    /// Streams changes to the Secret until dropped. The stream may begin with
    /// the Secret's current state.
    fn watch(&self, secret: &SecretRef) -> BoxStream<'static, SecretEvent>;
}

/// Caches the data of each Secret requested through
/// [`SecretWatcher::get_secret_data`] and watches it for changes.
///
/// Changed Secrets are announced on the channel given to [`SecretWatcher::new`].
/// The watcher never calls into its consumer directly, so it may be used while
/// the consumer holds its own locks.
pub struct SecretWatcher {
    backend: Arc<dyn SecretBackend>,
    secrets: Arc<Mutex<HashMap<SecretRef, Watched>>>,
    updates: mpsc::UnboundedSender<SecretRef>,
}

#[derive(Debug)]
struct Watched {
    data: Option<SecretData>,
    /// Set until a get succeeds or the watch reports the Secret.
    needs_get: bool,
    getting: bool,
    stale: bool,
    task: JoinHandle<()>,
}

/// An in-memory [`SecretBackend`].
#[derive(Clone)]
pub struct MemorySecrets {
    secrets: Arc<Mutex<HashMap<SecretRef, SecretData>>>,
    events: broadcast::Sender<(SecretRef, SecretEvent)>,
}

// === impl SecretRef ===

impl SecretRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl SecretWatcher ===

impl SecretWatcher {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        updates: mpsc::UnboundedSender<SecretRef>,
    ) -> Self {
        Self {
            backend,
            secrets: Default::default(),
            updates,
        }
    }

    /// Returns the Secret's data, or `None` if it does not exist.
    ///
    /// The first request for a Secret starts watching it. Cached data is
    /// returned until the Secret changes; a failed get is retried on the
    /// next request.
    pub async fn get_secret_data(
        &self,
        secret: &SecretRef,
    ) -> Result<Option<SecretData>, Error> {
        {
            let mut secrets = self.secrets.lock();
            match secrets.get_mut(secret) {
                Some(watched) => {
                    watched.stale = false;
                    if !watched.needs_get {
                        return Ok(watched.data.clone());
                    }
                    watched.getting = true;
                }
                None => {
                    info!(%secret, "Watching secret");
                    let task = self.spawn_watch(secret.clone());
                    secrets.insert(
                        secret.clone(),
                        Watched {
                            data: None,
                            needs_get: true,
                            getting: true,
                            stale: false,
                            task,
                        },
                    );
                }
            }
        }

        let result = self.backend.get(secret).await;
        if let Some(watched) = self.secrets.lock().get_mut(secret) {
            watched.getting = false;
            match &result {
                Ok(data) => {
                    watched.data = data.clone();
                    watched.needs_get = false;
                }
                Err(_) => watched.needs_get = true,
            }
        }
        result
    }

    /// Marks every watched Secret as stale. Secrets that are not requested
    /// again before [`SecretWatcher::sweep_stale`] are no longer watched.
    pub fn mark_stale(&self) {
        for watched in self.secrets.lock().values_mut() {
            watched.stale = true;
        }
    }

    pub fn sweep_stale(&self) {
        self.secrets.lock().retain(|secret, watched| {
            if watched.stale {
                info!(%secret, "No longer watching secret");
                watched.task.abort();
            }
            !watched.stale
        });
    }

    /// The Secrets currently watched.
    pub fn watched(&self) -> Vec<SecretRef> {
        let mut secrets = self.secrets.lock().keys().cloned().collect::<Vec<_>>();
        secrets.sort();
        secrets
    }

    fn spawn_watch(&self, secret: SecretRef) -> JoinHandle<()> {
        let span = info_span!("secret", namespace = %secret.namespace, name = %secret.name);
        let events = self.backend.watch(&secret);
        let secrets = self.secrets.clone();
        let updates = self.updates.clone();
        tokio::spawn(watch(secret, events, secrets, updates).instrument(span))
    }
}

impl Drop for SecretWatcher {
    fn drop(&mut self) {
        for watched in self.secrets.lock().values() {
            watched.task.abort();
        }
    }
}

async fn watch(
    secret: SecretRef,
    mut events: BoxStream<'static, SecretEvent>,
    secrets: Arc<Mutex<HashMap<SecretRef, Watched>>>,
    updates: mpsc::UnboundedSender<SecretRef>,
) {
    while let Some(event) = events.next().await {
        let data = match event {
            SecretEvent::Applied(data) => Some(data),
            SecretEvent::Deleted => None,
        };

        let changed = {
            let mut secrets = secrets.lock();
            let Some(watched) = secrets.get_mut(&secret) else {
                return;
            };
            // Changes seen while a get is in flight are reported by the get.
            let changed = !watched.getting && watched.data != data;
            watched.data = data;
            watched.needs_get = false;
            changed
        };

        if changed {
            debug!("Secret changed");
            if updates.send(secret.clone()).is_err() {
                return;
            }
        }
    }
}

/// Builds a remote cluster configuration from the data of an access Secret.
pub fn spec_from_secret(data: &SecretData) -> RemoteClusterConfigurationSpec {
    let field = |key: &str| {
        data.get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    };
    RemoteClusterConfigurationSpec {
        datastore_type: field("datastoreType"),
        etcd: EtcdConfig {
            endpoints: field("etcdEndpoints"),
            username: field("etcdUsername"),
            password: field("etcdPassword"),
            key: field("etcdKey"),
            cert: field("etcdCert"),
            ca_cert: field("etcdCACert"),
            ..Default::default()
        },
        kube: KubeConfig {
            kubeconfig_inline: field("kubeconfig"),
            ..Default::default()
        },
        ..Default::default()
    }
}

// === impl MemorySecrets ===

impl Default for MemorySecrets {
    fn default() -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            secrets: Default::default(),
            events,
        }
    }
}

impl MemorySecrets {
    pub fn apply(&self, secret: SecretRef, data: SecretData) {
        self.secrets.lock().insert(secret.clone(), data.clone());
        let _ = self.events.send((secret, SecretEvent::Applied(data)));
    }

    pub fn delete(&self, secret: &SecretRef) {
        if self.secrets.lock().remove(secret).is_some() {
            let _ = self.events.send((secret.clone(), SecretEvent::Deleted));
        }
    }
}

#[async_trait::async_trait]
impl SecretBackend for MemorySecrets {
    async fn get(&self, secret: &SecretRef) -> Result<Option<SecretData>, Error> {
        Ok(self.secrets.lock().get(secret).cloned())
    }

    fn watch(&self, secret: &SecretRef) -> BoxStream<'static, SecretEvent> {
        let secret = secret.clone();
        let events = BroadcastStream::new(self.events.subscribe());
        let initial = self
            .secrets
            .lock()
            .get(&secret)
            .cloned()
            .map_or(SecretEvent::Deleted, SecretEvent::Applied);
        let changes = events.filter_map(move |event| {
            let event = match event {
                Ok((s, event)) if s == secret => Some(event),
                _ => None,
            };
            future::ready(event)
        });
        stream::once(future::ready(initial)).chain(changes).boxed()
    }
}
