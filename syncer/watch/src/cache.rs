use crate::syncer::ResourceType;
use ahash::AHashMap as HashMap;
use calico_syncer_core::{
    Client, Error, KVPair, KVPairList, Key, ListOptions, Update, UpdateProcessor, UpdateType,
    WatchEvent,
};
use futures::prelude::*;
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before re-watching when a watch closes without delivering anything.
const REWATCH_DELAY: Duration = Duration::from_secs(1);

/// Messages from a watch to its syncer.
#[derive(Debug)]
pub(crate) enum Message {
    Updates(Vec<Update>),
    /// A list succeeded and its snapshot is being applied.
    Resyncing(usize),
    /// The snapshot of a list has been fully delivered.
    Synced(usize),
    Failed(Error),
}

/// Lists and then watches a single resource type, caching the keys it has
/// reported so that relists only report differences.
pub(crate) struct WatcherCache {
    id: usize,
    client: Arc<dyn Client>,
    list: ListOptions,
    processor: Option<Box<dyn UpdateProcessor>>,
    results: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,

    resources: HashMap<Key, CacheEntry>,
    revision: String,
    backoff: Backoff,
}

#[derive(Debug)]
struct CacheEntry {
    revision: String,
    seen: bool,
}

enum Outcome {
    Resync,
    Shutdown,
}

#[derive(Debug)]
struct Backoff(Duration);

// === impl WatcherCache ===

impl WatcherCache {
    pub(crate) fn new(
        id: usize,
        client: Arc<dyn Client>,
        resource_type: ResourceType,
        results: mpsc::UnboundedSender<Message>,
        shutdown: CancellationToken,
    ) -> Self {
        let ResourceType {
            list, processor, ..
        } = resource_type;
        Self {
            id,
            client,
            list,
            processor,
            results,
            shutdown,
            resources: HashMap::default(),
            revision: String::new(),
            backoff: Backoff(MIN_BACKOFF),
        }
    }

    /// Runs until shutdown, returning a deletion for every key still cached.
    pub(crate) async fn run(mut self) -> Vec<Update> {
        while self.resync().await {
            match self.watch().await {
                Outcome::Resync => continue,
                Outcome::Shutdown => break,
            }
        }

        let mut keys = self.resources.drain().map(|(k, _)| k).collect::<Vec<_>>();
        keys.sort();
        debug!(count = keys.len(), "Watch stopped");
        keys.into_iter()
            .map(|key| Update::new(KVPair::deleted(key), UpdateType::Deleted))
            .collect()
    }

    /// Lists until a snapshot is applied. Returns false on shutdown.
    async fn resync(&mut self) -> bool {
        if let Some(processor) = self.processor.as_mut() {
            processor.on_syncer_starting();
        }

        loop {
            let list = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                list = self.client.list(&self.list, "") => list,
            };

            match list {
                Ok(list) => {
                    self.apply_snapshot(list);
                    return true;
                }
                Err(error) if error.is_unsupported() => {
                    info!(%error, "Resource type is not supported by the datastore");
                    self.apply_snapshot(KVPairList::default());
                    self.shutdown.cancelled().await;
                    return false;
                }
                Err(error) => {
                    warn!(%error, "Failed to list resources");
                    self.send(Message::Failed(error));
                    let delay = self.backoff.next();
                    if !self.sleep(delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn watch(&mut self) -> Outcome {
        loop {
            let watch = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Outcome::Shutdown,
                watch = self.client.watch(&self.list, &self.revision) => watch,
            };
            let mut events = match watch {
                Ok(events) => events,
                Err(error) => {
                    warn!(%error, revision = %self.revision, "Failed to watch resources");
                    self.send(Message::Failed(error));
                    let delay = self.backoff.next();
                    if !self.sleep(delay).await {
                        return Outcome::Shutdown;
                    }
                    return Outcome::Resync;
                }
            };

            let mut received = false;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Outcome::Shutdown,
                    event = events.next() => event,
                };
                match event {
                    None => {
                        debug!(revision = %self.revision, "Watch closed");
                        break;
                    }
                    Some(WatchEvent::Error(error)) => {
                        let delay = self.backoff.next();
                        info!(%error, ?delay, "Watch failed; resyncing");
                        if !self.sleep(delay).await {
                            return Outcome::Shutdown;
                        }
                        return Outcome::Resync;
                    }
                    Some(event) => {
                        // Only a watch that delivers resets the backoff.
                        if !received {
                            received = true;
                            self.backoff.reset();
                        }
                        self.apply_event(event);
                    }
                }
            }

            if !received && !self.sleep(REWATCH_DELAY).await {
                return Outcome::Shutdown;
            }
        }
    }

    fn apply_snapshot(&mut self, list: KVPairList) {
        self.send(Message::Resyncing(self.id));

        for entry in self.resources.values_mut() {
            entry.seen = false;
        }

        let mut updates = Vec::new();
        for kv in list.items {
            self.process(kv, &mut updates);
        }

        let mut stale = self
            .resources
            .iter()
            .filter(|(_, e)| !e.seen)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        stale.sort();
        for key in stale {
            self.resources.remove(&key);
            let kv = KVPair::deleted(key).with_revision(&list.revision);
            updates.push(Update::new(kv, UpdateType::Deleted));
        }

        debug!(revision = %list.revision, updates = updates.len(), "Applied snapshot");
        self.revision = list.revision;
        if !updates.is_empty() {
            self.send(Message::Updates(updates));
        }
        self.send(Message::Synced(self.id));
    }

    fn apply_event(&mut self, event: WatchEvent) {
        let kv = match event {
            WatchEvent::Added(kv) | WatchEvent::Modified(kv) => kv,
            WatchEvent::Deleted(kv) => KVPair { value: None, ..kv },
            WatchEvent::Error(_) => return,
        };
        if !kv.revision.is_empty() {
            self.revision = kv.revision.clone();
        }

        let mut updates = Vec::new();
        self.process(kv, &mut updates);
        if !updates.is_empty() {
            self.send(Message::Updates(updates));
        }
    }

    fn process(&mut self, kv: KVPair, updates: &mut Vec<Update>) {
        let kvs = match self.processor.as_mut() {
            None => vec![kv],
            Some(processor) => match processor.process(&kv) {
                Ok(kvs) => kvs,
                Err(error) => {
                    warn!(%error, key = %kv.key, "Failed to process update");
                    return;
                }
            },
        };

        for kv in kvs {
            if kv.value.is_none() {
                if self.resources.remove(&kv.key).is_some() {
                    updates.push(Update::new(kv, UpdateType::Deleted));
                }
                continue;
            }

            match self.resources.entry(kv.key.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(CacheEntry {
                        revision: kv.revision.clone(),
                        seen: true,
                    });
                    updates.push(Update::new(kv, UpdateType::New));
                }
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    entry.seen = true;
                    if !kv.revision.is_empty() && entry.revision == kv.revision {
                        continue;
                    }
                    entry.revision = kv.revision.clone();
                    updates.push(Update::new(kv, UpdateType::Updated));
                }
            }
        }
    }

    async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = time::sleep(delay) => true,
        }
    }

    fn send(&self, msg: Message) {
        // The syncer only stops receiving once every watch has stopped.
        let _ = self.results.send(msg);
    }
}

// === impl Backoff ===

impl Backoff {
    fn next(&mut self) -> Duration {
        let delay = self.0;
        self.0 = (self.0 * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.0 = MIN_BACKOFF;
    }
}
