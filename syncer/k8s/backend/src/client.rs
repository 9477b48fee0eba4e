use crate::{
    api_error,
    resources::{self, Kind},
};
use calico_syncer_core::{
    Client, Error, KVPair, KVPairList, Key, ListOptions, WatchEvent, WatchStream,
};
use futures::prelude::*;
use kube::{
    api::{
        Api, DeleteParams, DynamicObject, ListParams, PostParams, Preconditions, VersionMatch,
        WatchParams,
    },
    core::WatchEvent as KubeWatchEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// A datastore client that stores v3 resources as Kubernetes objects.
///
/// IPAM blocks are served in the v1 model under [`ListOptions::Blocks`] and
/// `Block` keys, backed by `IPAMBlock` objects.
pub struct KubeClient {
    client: kube::Client,
    closed: AtomicBool,
}

// === impl KubeClient ===

impl KubeClient {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn api(&self, kind: &Kind, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace.filter(|_| kind.namespaced) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &kind.api),
            None => Api::all_with(self.client.clone(), &kind.api),
        }
    }

    fn list_api(&self, list: &ListOptions) -> Result<Api<DynamicObject>, Error> {
        let kind = resources::lookup(list.kind())?;
        let namespace = match list {
            ListOptions::Resource(opts) => opts.namespace.as_deref(),
            ListOptions::Blocks => None,
        };
        Ok(self.api(&kind, namespace))
    }
}

fn field_selector(list: &ListOptions) -> Option<String> {
    match list {
        ListOptions::Resource(opts) => opts.name.as_ref().map(|n| format!("metadata.name={n}")),
        ListOptions::Blocks => None,
    }
}

#[async_trait::async_trait]
impl Client for KubeClient {
    async fn list(&self, list: &ListOptions, revision: &str) -> Result<KVPairList, Error> {
        self.check()?;
        let api = self.list_api(list)?;
        let mut params = ListParams::default();
        if let Some(fields) = field_selector(list) {
            params = params.fields(&fields);
        }
        if !revision.is_empty() {
            params = params.at(revision).matching(VersionMatch::NotOlderThan);
        }

        let objects = api.list(&params).await.map_err(|error| match api_error(error, list) {
            // The resource type is not served, e.g. its CRD is not installed.
            Error::ResourceDoesNotExist(_) => {
                Error::OperationNotSupported(format!("{list} is not served"))
            }
            error => error,
        })?;

        let revision = objects.metadata.resource_version.unwrap_or_default();
        let items = objects
            .items
            .into_iter()
            .filter_map(|obj| match resources::decode(list.kind(), obj) {
                Ok(kv) => Some(kv),
                Err(error) => {
                    warn!(%list, %error, "Skipping invalid object");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(%list, %revision, items = items.len(), "Listed");
        Ok(KVPairList { items, revision })
    }

    async fn watch(&self, list: &ListOptions, revision: &str) -> Result<WatchStream, Error> {
        self.check()?;
        let api = self.list_api(list)?;
        let mut params = WatchParams::default();
        if let Some(fields) = field_selector(list) {
            params = params.fields(&fields);
        }

        let events = api
            .watch(&params, revision)
            .await
            .map_err(|error| api_error(error, list))?;
        let list = list.clone();
        Ok(events
            .filter_map(move |event| future::ready(watch_event(&list, event)))
            .boxed())
    }

    async fn get(&self, key: &Key, _revision: &str) -> Result<KVPair, Error> {
        self.check()?;
        let location = resources::locate(key)?;
        let api = self.api(&resources::lookup(location.kind)?, location.namespace);
        let obj = api
            .get(&location.name)
            .await
            .map_err(|error| api_error(error, key))?;
        resources::decode(location.kind, obj)
    }

    async fn update(&self, kv: KVPair) -> Result<KVPair, Error> {
        self.check()?;
        let Some(value) = kv.value.as_ref() else {
            return Err(Error::InvalidConfig(format!("no value to store at {}", kv.key)));
        };
        let location = resources::locate(&kv.key)?;
        let api = self.api(&resources::lookup(location.kind)?, location.namespace);

        let mut obj = resources::encode(&kv.key, value)?;
        obj.metadata.resource_version = (!kv.revision.is_empty()).then(|| kv.revision.clone());
        let obj = api
            .replace(&location.name, &PostParams::default(), &obj)
            .await
            .map_err(|error| api_error(error, &kv.key))?;
        resources::decode(location.kind, obj)
    }

    async fn delete(&self, key: &Key, revision: &str) -> Result<KVPair, Error> {
        self.check()?;
        let location = resources::locate(key)?;
        let api = self.api(&resources::lookup(location.kind)?, location.namespace);

        let mut params = DeleteParams::default();
        if !revision.is_empty() {
            params.preconditions = Some(Preconditions {
                resource_version: Some(revision.to_string()),
                uid: None,
            });
        }
        api.delete(&location.name, &params)
            .await
            .map_err(|error| api_error(error, key))?;
        Ok(KVPair::deleted(key.clone()).with_revision(revision))
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn clean(&self) -> Result<(), Error> {
        Err(Error::OperationNotSupported(
            "the Kubernetes datastore cannot be cleaned".to_string(),
        ))
    }
}

fn watch_event(
    list: &ListOptions,
    event: Result<KubeWatchEvent<DynamicObject>, kube::Error>,
) -> Option<WatchEvent> {
    let decode = |obj| resources::decode(list.kind(), obj);
    let event = match event {
        Ok(KubeWatchEvent::Added(obj)) => decode(obj).map(WatchEvent::Added),
        Ok(KubeWatchEvent::Modified(obj)) => decode(obj).map(WatchEvent::Modified),
        Ok(KubeWatchEvent::Deleted(obj)) => decode(obj).map(WatchEvent::Deleted),
        Ok(KubeWatchEvent::Bookmark(_)) => return None,
        Ok(KubeWatchEvent::Error(error)) => Err(Error::Watch(error.to_string())),
        Err(error) => Err(Error::Watch(error.to_string())),
    };
    Some(event.unwrap_or_else(WatchEvent::Error))
}
