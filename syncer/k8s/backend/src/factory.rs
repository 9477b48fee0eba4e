use crate::{api_error, KubeClient};
use calico_syncer_core::{
    apiconfig::KubeConfig, CalicoApiConfig, Client, ClientFactory, DatastoreType, Error,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::{fmt, sync::Arc};
use tracing::debug;

/// Connects to remote Kubernetes datastores.
///
/// The API server is reached through an inline kubeconfig, a kubeconfig file
/// or, failing both, a bare API endpoint. A client is returned only once the
/// server has answered a version request.
#[derive(Copy, Clone, Debug, Default)]
pub struct KubeClientFactory(());

#[async_trait::async_trait]
impl ClientFactory for KubeClientFactory {
    async fn create_client(&self, config: &CalicoApiConfig) -> Result<Arc<dyn Client>, Error> {
        if config.datastore_type != DatastoreType::Kubernetes {
            return Err(Error::Datastore(format!(
                "{} datastore is not supported",
                config.datastore_type
            )));
        }

        let client = kube::Client::try_from(kube_config(&config.kube).await?)
            .map_err(|error| Error::Datastore(error.to_string()))?;
        let version = client
            .apiserver_version()
            .await
            .map_err(|error| api_error(error, "API server version"))?;
        debug!(version = %version.git_version, "Connected to remote API server");
        Ok(Arc::new(KubeClient::new(client)))
    }
}

pub(crate) async fn kube_config(config: &KubeConfig) -> Result<kube::Config, Error> {
    let options = KubeConfigOptions::default();

    if !config.kubeconfig_inline.is_empty() {
        let kubeconfig = Kubeconfig::from_yaml(&config.kubeconfig_inline).map_err(invalid)?;
        return kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(invalid);
    }

    if !config.kubeconfig.is_empty() {
        let kubeconfig = Kubeconfig::read_from(&config.kubeconfig).map_err(invalid)?;
        return kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(invalid);
    }

    if !config.api_endpoint.is_empty() {
        let mut kube = match config.api_endpoint.parse() {
            Ok(url) => kube::Config::new(url),
            Err(error) => return Err(invalid(error)),
        };
        kube.accept_invalid_certs = config.insecure_skip_tls_verify;
        return Ok(kube);
    }

    Err(Error::InvalidConfig(
        "no Kubernetes API server is configured".to_string(),
    ))
}

fn invalid(error: impl fmt::Display) -> Error {
    Error::InvalidConfig(error.to_string())
}
