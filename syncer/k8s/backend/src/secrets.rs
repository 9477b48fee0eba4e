use crate::api_error;
use calico_syncer_core::{k8s::Secret, Error};
use calico_syncer_remote::{SecretBackend, SecretData, SecretEvent, SecretRef};
use futures::{prelude::*, stream::BoxStream};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api,
};
use tracing::warn;

/// Reads Secrets from the local cluster.
#[derive(Clone)]
pub struct KubeSecrets {
    client: kube::Client,
}

// === impl KubeSecrets ===

impl KubeSecrets {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretBackend for KubeSecrets {
    async fn get(&self, secret: &SecretRef) -> Result<Option<SecretData>, Error> {
        let api = Api::<Secret>::namespaced(self.client.clone(), &secret.namespace);
        let found = api
            .get_opt(&secret.name)
            .await
            .map_err(|error| api_error(error, secret))?;
        Ok(found.map(secret_data))
    }

    fn watch(&self, secret: &SecretRef) -> BoxStream<'static, SecretEvent> {
        let api = Api::<Secret>::namespaced(self.client.clone(), &secret.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", secret.name));
        let secret = secret.clone();

        // Set once the current (re)list has reported the Secret.
        let mut exists = false;
        watcher(api, config)
            .default_backoff()
            .filter_map(move |event| {
                let event = match event {
                    Ok(watcher::Event::Init) => {
                        exists = false;
                        None
                    }
                    Ok(watcher::Event::InitApply(s) | watcher::Event::Apply(s)) => {
                        exists = true;
                        Some(SecretEvent::Applied(secret_data(s)))
                    }
                    Ok(watcher::Event::InitDone) => (!exists).then_some(SecretEvent::Deleted),
                    Ok(watcher::Event::Delete(_)) => {
                        exists = false;
                        Some(SecretEvent::Deleted)
                    }
                    Err(error) => {
                        warn!(%secret, %error, "Failed to watch secret");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed()
    }
}

pub(crate) fn secret_data(secret: Secret) -> SecretData {
    secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect()
}
