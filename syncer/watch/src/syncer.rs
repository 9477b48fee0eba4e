use crate::cache::{Message, WatcherCache};
use ahash::AHashMap as HashMap;
use calico_syncer_core::{
    Client, Error, ListOptions, SyncStatus, Syncer, SyncerCallbacks, Update, UpdateProcessor,
};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The most watch messages folded into one delivery.
const MAX_BATCH: usize = 1000;

/// A resource type to be synced: what to list and watch, how to convert it and
/// (for multi-client syncers) which client to read it from.
pub struct ResourceType {
    pub list: ListOptions,
    pub processor: Option<Box<dyn UpdateProcessor>>,
    pub client_id: Option<String>,
}

/// Syncs a set of resource types, aggregating the status of one watch per
/// type into a single status for its callbacks.
///
/// The syncer reports `WaitForDatastore` until any list succeeds,
/// `ResyncInProgress` while any watch is applying a snapshot and `InSync` once
/// every watch has applied one. Updates are batched and always delivered
/// before the status change that follows them.
pub struct WatcherSyncer {
    state: Mutex<State>,
}

enum State {
    Pending {
        watches: Vec<(Arc<dyn Client>, ResourceType)>,
        callbacks: Arc<dyn SyncerCallbacks>,
    },
    Running {
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

struct Aggregator {
    callbacks: Arc<dyn SyncerCallbacks>,
    status: SyncStatus,
    synced: Vec<bool>,
    pending: Vec<Update>,
}

// === impl ResourceType ===

impl ResourceType {
    pub fn new(list: ListOptions) -> Self {
        Self {
            list,
            processor: None,
            client_id: None,
        }
    }

    pub fn with_processor(mut self, processor: impl UpdateProcessor) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    pub fn with_client(mut self, client_id: impl ToString) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("list", &self.list)
            .field("processor", &self.processor.is_some())
            .field("client_id", &self.client_id)
            .finish()
    }
}

// === impl WatcherSyncer ===

impl WatcherSyncer {
    /// Builds a syncer that reads every resource type from `client`.
    pub fn new(
        client: Arc<dyn Client>,
        resource_types: Vec<ResourceType>,
        callbacks: Arc<dyn SyncerCallbacks>,
    ) -> Self {
        let watches = resource_types
            .into_iter()
            .map(|rt| (client.clone(), rt))
            .collect();
        Self::pending(watches, callbacks)
    }

    /// Builds a syncer that reads each resource type from the client named by
    /// its `client_id`.
    pub fn new_multi_client(
        clients: impl IntoIterator<Item = (String, Arc<dyn Client>)>,
        resource_types: Vec<ResourceType>,
        callbacks: Arc<dyn SyncerCallbacks>,
    ) -> Result<Self, Error> {
        let clients = clients.into_iter().collect::<HashMap<_, _>>();
        let watches = resource_types
            .into_iter()
            .map(|rt| {
                let id = rt.client_id.as_deref().ok_or_else(|| {
                    Error::InvalidConfig(format!("no client named for {}", rt.list))
                })?;
                let client = clients.get(id).cloned().ok_or_else(|| {
                    Error::InvalidConfig(format!("unknown client {id} for {}", rt.list))
                })?;
                Ok((client, rt))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self::pending(watches, callbacks))
    }

    fn pending(
        watches: Vec<(Arc<dyn Client>, ResourceType)>,
        callbacks: Arc<dyn SyncerCallbacks>,
    ) -> Self {
        Self {
            state: Mutex::new(State::Pending { watches, callbacks }),
        }
    }
}

#[async_trait::async_trait]
impl Syncer for WatcherSyncer {
    fn start(&self) {
        let mut state = self.state.lock();
        let (watches, callbacks) = match std::mem::replace(&mut *state, State::Stopped) {
            State::Pending { watches, callbacks } => (watches, callbacks),
            running @ State::Running { .. } => {
                warn!("Syncer already started");
                *state = running;
                return;
            }
            State::Stopped => {
                warn!("Syncer already stopped");
                return;
            }
        };

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(watches, callbacks, shutdown.clone()).in_current_span());
        *state = State::Running { shutdown, task };
    }

    async fn stop(&self) {
        let state = std::mem::replace(&mut *self.state.lock(), State::Stopped);
        if let State::Running { shutdown, task } = state {
            shutdown.cancel();
            if let Err(error) = task.await {
                error!(%error, "Syncer task failed");
            }
        }
    }
}

impl Drop for WatcherSyncer {
    fn drop(&mut self) {
        if let State::Running { shutdown, .. } = &*self.state.get_mut() {
            shutdown.cancel();
        }
    }
}

async fn run(
    watches: Vec<(Arc<dyn Client>, ResourceType)>,
    callbacks: Arc<dyn SyncerCallbacks>,
    shutdown: CancellationToken,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tasks = Vec::with_capacity(watches.len());
    for (id, (client, rt)) in watches.into_iter().enumerate() {
        let span = info_span!("watch", kind = %rt.list);
        let cache = WatcherCache::new(id, client, rt, tx.clone(), shutdown.child_token());
        tasks.push(tokio::spawn(cache.run().instrument(span)));
    }
    drop(tx);

    let mut agg = Aggregator {
        callbacks,
        status: SyncStatus::WaitForDatastore,
        synced: vec![false; tasks.len()],
        pending: Vec::new(),
    };
    agg.callbacks
        .on_status_updated(SyncStatus::WaitForDatastore)
        .await;
    if tasks.is_empty() {
        agg.set_status(SyncStatus::InSync).await;
    }

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        agg.handle(msg).await;

        // Batch whatever else is ready before delivering, bounded so that a
        // busy watch cannot hold back delivery.
        for _ in 1..MAX_BATCH {
            match rx.try_recv() {
                Ok(msg) => agg.handle(msg).await,
                Err(_) => break,
            }
        }
        agg.flush().await;
    }

    // Watches stop once shutdown is signaled, returning deletions for all of
    // the keys they reported. Updates that were already queued go first.
    shutdown.cancel();
    let mut deletions = Vec::new();
    for task in tasks {
        match task.await {
            Ok(updates) => deletions.extend(updates),
            Err(error) => error!(%error, "Watch task failed"),
        }
    }
    while let Ok(msg) = rx.try_recv() {
        if let Message::Updates(updates) = msg {
            agg.pending.extend(updates);
        }
    }
    agg.pending.extend(deletions);
    agg.flush().await;
    debug!("Syncer stopped");
}

// === impl Aggregator ===

impl Aggregator {
    async fn handle(&mut self, msg: Message) {
        match msg {
            Message::Updates(updates) => self.pending.extend(updates),
            Message::Resyncing(id) => {
                self.synced[id] = false;
                if self.status != SyncStatus::ResyncInProgress {
                    self.set_status(SyncStatus::ResyncInProgress).await;
                }
            }
            Message::Synced(id) => {
                self.synced[id] = true;
                if self.status != SyncStatus::InSync && self.synced.iter().all(|s| *s) {
                    self.set_status(SyncStatus::InSync).await;
                }
            }
            Message::Failed(error) => {
                self.flush().await;
                self.callbacks.on_connection_failed(&error).await;
            }
        }
    }

    async fn set_status(&mut self, status: SyncStatus) {
        self.flush().await;
        info!(%status, "Sync status changed");
        self.status = status;
        self.callbacks.on_status_updated(status).await;
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let updates = std::mem::take(&mut self.pending);
        self.callbacks.on_updates(updates).await;
    }
}
