use crate::{
    apiconfig::CalicoApiConfig,
    error::Error,
    key::Key,
    model::{KVPair, SyncStatus, Update},
};
use futures::prelude::*;
use std::{fmt, pin::Pin, sync::Arc};

/// A change observed on a watch.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Added(KVPair),
    Modified(KVPair),
    /// Carries the last known value, when the datastore reports one.
    Deleted(KVPair),
    /// The watch can no longer be trusted; the watcher must resync.
    Error(Error),
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send + 'static>>;

/// The result of a list: every matching pair as of `revision`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KVPairList {
    pub items: Vec<KVPair>,
    pub revision: String,
}

/// Selects the pairs a list or watch covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListOptions {
    Resource(ResourceListOptions),
    /// All IPAM allocation blocks, in the v1 model.
    Blocks,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceListOptions {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

/// A datastore client.
#[async_trait::async_trait]
pub trait Client: Send + Sync + 'static {
    async fn list(&self, list: &ListOptions, revision: &str) -> Result<KVPairList, Error>;

    /// Watches for changes after `revision`, or from the current revision
    /// when it is empty.
    async fn watch(&self, list: &ListOptions, revision: &str) -> Result<WatchStream, Error>;

    async fn get(&self, key: &Key, revision: &str) -> Result<KVPair, Error>;

    /// Replaces the value at `kv.key`. A non-empty `kv.revision` must match the
    /// stored revision.
    async fn update(&self, kv: KVPair) -> Result<KVPair, Error>;

    async fn delete(&self, key: &Key, revision: &str) -> Result<KVPair, Error>;

    async fn close(&self) -> Result<(), Error>;

    /// Removes all data from the datastore.
    async fn clean(&self) -> Result<(), Error>;
}

/// Builds clients for remote datastores.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn create_client(&self, config: &CalicoApiConfig) -> Result<Arc<dyn Client>, Error>;
}

/// Converts pairs of one resource type into the pairs that are actually
/// synced. A deletion is processed with a pair that has no value.
///
/// Processors may be stateful; each instance serves a single watch.
pub trait UpdateProcessor: Send + 'static {
    fn process(&mut self, kv: &KVPair) -> Result<Vec<KVPair>, Error>;

    /// Called before a processor's watch (re)starts.
    fn on_syncer_starting(&mut self) {}
}

/// Receives the output of a syncer.
///
/// Calls are made sequentially from a single task per syncer.
#[async_trait::async_trait]
pub trait SyncerCallbacks: Send + Sync + 'static {
    async fn on_status_updated(&self, status: SyncStatus);

    async fn on_updates(&self, updates: Vec<Update>);

    /// Called when the datastore could not be listed or watched. The syncer
    /// keeps retrying.
    async fn on_connection_failed(&self, _error: &Error) {}
}

#[async_trait::async_trait]
pub trait Syncer: Send + Sync {
    fn start(&self);

    /// Stops all watches, delivering a deletion for every synced key.
    /// Returns once no further callbacks will be made.
    async fn stop(&self);
}

// === impl WatchEvent ===

impl WatchEvent {
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Added(kv) | Self::Modified(kv) | Self::Deleted(kv) => Some(&kv.key),
            Self::Error(_) => None,
        }
    }
}

// === impl ListOptions ===

impl ListOptions {
    pub fn resource(kind: impl ToString) -> Self {
        Self::Resource(ResourceListOptions {
            kind: kind.to_string(),
            namespace: None,
            name: None,
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Resource(opts) => &opts.kind,
            Self::Blocks => "Block",
        }
    }

    pub fn matches(&self, key: &Key) -> bool {
        match (self, key) {
            (Self::Resource(opts), Key::Resource(key)) => {
                opts.kind == key.kind
                    && opts
                        .namespace
                        .as_ref()
                        .map_or(true, |ns| Some(ns) == key.namespace.as_ref())
                    && opts.name.as_ref().map_or(true, |name| *name == key.name)
            }
            (Self::Blocks, Key::Block { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(ResourceListOptions {
                kind,
                namespace,
                name,
            }) => {
                f.write_str(kind)?;
                if let Some(ns) = namespace {
                    write!(f, " namespace={ns}")?;
                }
                if let Some(name) = name {
                    write!(f, " name={name}")?;
                }
                Ok(())
            }
            Self::Blocks => f.write_str("Block"),
        }
    }
}
