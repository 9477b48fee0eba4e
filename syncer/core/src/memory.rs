//! An in-memory datastore.
//!
//! The store keeps a bounded history of changes so that watches may resume
//! from any recent revision, as a real datastore would.

use crate::{
    api::{Client, ClientFactory, KVPairList, ListOptions, WatchEvent, WatchStream},
    apiconfig::{CalicoApiConfig, DatastoreType},
    error::Error,
    key::Key,
    model::KVPair,
};
use ahash::AHashMap as HashMap;
use futures::prelude::*;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

const HISTORY_LIMIT: usize = 1024;
const EVENTS_CAPACITY: usize = 1024;

/// A handle on an in-memory store. Clones share the store; closing a handle
/// only affects that handle.
#[derive(Clone)]
pub struct MemoryClient {
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
}

/// Hands out handles on named in-memory stores, keyed by the endpoint of a
/// datastore config.
#[derive(Clone, Default)]
pub struct MemoryClientFactory {
    stores: Arc<RwLock<HashMap<String, MemoryClient>>>,
    attempts: Arc<AtomicUsize>,
}

struct Shared {
    store: RwLock<Store>,
    events: broadcast::Sender<Broadcast>,
}

#[derive(Default)]
struct Store {
    revision: u64,
    items: BTreeMap<Key, KVPair>,
    history: VecDeque<(u64, WatchEvent)>,
    unavailable: Option<Error>,
}

#[derive(Clone, Debug)]
enum Broadcast {
    Event(u64, WatchEvent),
    Interrupt(Error),
}

// === impl MemoryClient ===

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(Store::default()),
                events,
            }),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a new handle on the same store.
    pub fn session(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn create(&self, kv: KVPair) -> Result<KVPair, Error> {
        self.check_open()?;
        let mut store = self.shared.store.write();
        if store.items.contains_key(&kv.key) {
            return Err(Error::ResourceAlreadyExists(kv.key.to_string()));
        }
        Ok(self.write(&mut store, kv))
    }

    /// Creates or replaces the value at `kv.key`, ignoring `kv.revision`.
    pub fn apply(&self, kv: KVPair) -> Result<KVPair, Error> {
        self.check_open()?;
        let mut store = self.shared.store.write();
        Ok(self.write(&mut store, kv))
    }

    pub fn remove(&self, key: &Key) -> Result<KVPair, Error> {
        self.check_open()?;
        let mut store = self.shared.store.write();
        self.remove_locked(&mut store, key, "")
    }

    /// While set, every `Client` operation fails with `error` and open watches
    /// are interrupted. The store itself may still be modified through
    /// `create`, `apply` and `remove`.
    pub fn set_unavailable(&self, error: Option<Error>) {
        let mut store = self.shared.store.write();
        if let Some(error) = error.clone() {
            let _ = self.shared.events.send(Broadcast::Interrupt(error));
        }
        store.unavailable = error;
    }

    /// Interrupts open watches without changing any data.
    pub fn interrupt_watches(&self, error: Error) {
        let _store = self.shared.store.write();
        let _ = self.shared.events.send(Broadcast::Interrupt(error));
    }

    pub fn len(&self) -> usize {
        self.shared.store.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.shared.store.read().revision
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn check(&self) -> Result<(), Error> {
        self.check_open()?;
        if let Some(error) = self.shared.store.read().unavailable.clone() {
            return Err(error);
        }
        Ok(())
    }

    fn write(&self, store: &mut Store, mut kv: KVPair) -> KVPair {
        store.revision += 1;
        let revision = store.revision;
        kv.revision = revision.to_string();
        let event = match store.items.insert(kv.key.clone(), kv.clone()) {
            Some(_) => WatchEvent::Modified(kv.clone()),
            None => WatchEvent::Added(kv.clone()),
        };
        self.publish(store, revision, event);
        kv
    }

    fn remove_locked(&self, store: &mut Store, key: &Key, revision: &str) -> Result<KVPair, Error> {
        let current = store
            .items
            .get(key)
            .ok_or_else(|| Error::ResourceDoesNotExist(key.to_string()))?;
        if !revision.is_empty() && current.revision != revision {
            return Err(Error::ResourceUpdateConflict(key.to_string()));
        }

        let mut kv = store.items.remove(key).expect("item must exist");
        store.revision += 1;
        let revision = store.revision;
        kv.revision = revision.to_string();
        self.publish(store, revision, WatchEvent::Deleted(kv.clone()));
        Ok(kv)
    }

    fn publish(&self, store: &mut Store, revision: u64, event: WatchEvent) {
        store.history.push_back((revision, event.clone()));
        while store.history.len() > HISTORY_LIMIT {
            store.history.pop_front();
        }
        // Sent while the store is locked so that a concurrent watch either
        // replays the event from history or receives it live.
        let _ = self.shared.events.send(Broadcast::Event(revision, event));
    }
}

#[async_trait::async_trait]
impl Client for MemoryClient {
    async fn list(&self, list: &ListOptions, _revision: &str) -> Result<KVPairList, Error> {
        self.check()?;
        let store = self.shared.store.read();
        let items = store
            .items
            .values()
            .filter(|kv| list.matches(&kv.key))
            .cloned()
            .collect();
        Ok(KVPairList {
            items,
            revision: store.revision.to_string(),
        })
    }

    async fn watch(&self, list: &ListOptions, revision: &str) -> Result<WatchStream, Error> {
        self.check()?;
        let store = self.shared.store.read();
        let since = if revision.is_empty() {
            store.revision
        } else {
            revision
                .parse::<u64>()
                .map_err(|_| Error::Watch(format!("invalid revision: {revision}")))?
        };

        if let Some((oldest, _)) = store.history.front() {
            if since + 1 < *oldest {
                return Err(Error::Watch(format!(
                    "revision {since} has been compacted"
                )));
            }
        }

        let replay = store
            .history
            .iter()
            .filter(|(rev, ev)| *rev > since && ev.key().is_some_and(|k| list.matches(k)))
            .map(|(_, ev)| ev.clone())
            .collect::<Vec<_>>();
        let rx = self.shared.events.subscribe();
        drop(store);

        let list = list.clone();
        let live = BroadcastStream::new(rx)
            .filter_map(move |msg| {
                future::ready(match msg {
                    Ok(Broadcast::Event(rev, ev)) => {
                        (rev > since && ev.key().is_some_and(|k| list.matches(k))).then_some(ev)
                    }
                    Ok(Broadcast::Interrupt(error)) => Some(WatchEvent::Error(error)),
                    Err(BroadcastStreamRecvError::Lagged(n)) => Some(WatchEvent::Error(
                        Error::Watch(format!("watch fell behind by {n} events")),
                    )),
                })
            })
            .scan(false, |failed, ev| {
                // Nothing follows an error.
                if *failed {
                    return future::ready(None);
                }
                *failed = matches!(ev, WatchEvent::Error(_));
                future::ready(Some(ev))
            });

        Ok(Box::pin(stream::iter(replay).chain(live)))
    }

    async fn get(&self, key: &Key, _revision: &str) -> Result<KVPair, Error> {
        self.check()?;
        self.shared
            .store
            .read()
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ResourceDoesNotExist(key.to_string()))
    }

    async fn update(&self, kv: KVPair) -> Result<KVPair, Error> {
        self.check()?;
        let mut store = self.shared.store.write();
        let current = store
            .items
            .get(&kv.key)
            .ok_or_else(|| Error::ResourceDoesNotExist(kv.key.to_string()))?;
        if !kv.revision.is_empty() && current.revision != kv.revision {
            return Err(Error::ResourceUpdateConflict(kv.key.to_string()));
        }
        Ok(self.write(&mut store, kv))
    }

    async fn delete(&self, key: &Key, revision: &str) -> Result<KVPair, Error> {
        self.check()?;
        let mut store = self.shared.store.write();
        self.remove_locked(&mut store, key, revision)
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn clean(&self) -> Result<(), Error> {
        self.check()?;
        let mut store = self.shared.store.write();
        let keys = store.items.keys().cloned().collect::<Vec<_>>();
        for key in keys {
            self.remove_locked(&mut store, &key, "")?;
        }
        Ok(())
    }
}

// === impl MemoryClientFactory ===

impl MemoryClientFactory {
    /// Makes `client` reachable through configs whose endpoint is `endpoint`.
    pub fn insert(&self, endpoint: impl ToString, client: MemoryClient) {
        self.stores.write().insert(endpoint.to_string(), client);
    }

    pub fn remove(&self, endpoint: &str) -> Option<MemoryClient> {
        self.stores.write().remove(endpoint)
    }

    /// The number of clients requested so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    fn endpoint(config: &CalicoApiConfig) -> &str {
        match config.datastore_type {
            DatastoreType::EtcdV3 => &config.etcd.endpoints,
            DatastoreType::Kubernetes if !config.kube.api_endpoint.is_empty() => {
                &config.kube.api_endpoint
            }
            DatastoreType::Kubernetes if !config.kube.kubeconfig_inline.is_empty() => {
                &config.kube.kubeconfig_inline
            }
            DatastoreType::Kubernetes => &config.kube.kubeconfig,
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn create_client(&self, config: &CalicoApiConfig) -> Result<Arc<dyn Client>, Error> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        let endpoint = Self::endpoint(config);
        match self.stores.read().get(endpoint) {
            Some(store) => Ok(Arc::new(store.session())),
            None => Err(Error::Datastore(format!(
                "dial {endpoint}: connection refused"
            ))),
        }
    }
}
