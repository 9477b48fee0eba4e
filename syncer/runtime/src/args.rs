use crate::sink::{LogSink, SinkMetrics};
use anyhow::{bail, Result};
use calico_syncer_core::{Client, Syncer};
use calico_syncer_k8s_backend::{KubeClient, KubeClientFactory, KubeSecrets};
use calico_syncer_remote::{FederationBuilder, RemoteClusterMetrics, RestartMonitor};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "calico-syncer",
    about = "Syncs Calico datastore state, federating remote clusters"
)]
pub struct Args {
    #[clap(long, default_value = "calico=info,warn", env = "CALICO_SYNCER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, value_enum, default_value = "felix")]
    syncer: SyncerKind,

    /// Syncs Kubernetes Services along with the Felix syncer's resources.
    #[clap(long)]
    include_services: bool,

    /// Delay between attempts to connect to a remote cluster.
    #[clap(long, default_value = "10")]
    remote_retry_interval_secs: u64,

    /// Disables Secret watches. Remote clusters configured through a Secret
    /// are then reported as incomplete.
    #[clap(long)]
    secret_watch_disabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum SyncerKind {
    Felix,
    FederatedServices,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            syncer: kind,
            include_services,
            remote_retry_interval_secs,
            secret_watch_disabled,
        } = self;

        let mut prom = <Registry>::default();
        let remote_metrics = RemoteClusterMetrics::register(&mut prom);
        let sink_metrics = SinkMetrics::register(prom.sub_registry_with_prefix("syncer"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let calico: Arc<dyn Client> = Arc::new(KubeClient::new(client.clone()));

        let mut federation = FederationBuilder::new(Arc::new(KubeClientFactory::default()))
            .with_metrics(remote_metrics)
            .with_retry_interval(Duration::from_secs(remote_retry_interval_secs));
        if secret_watch_disabled {
            info!("Secret watches are disabled");
        } else {
            federation = federation.with_secrets(Arc::new(KubeSecrets::new(client)));
        }

        let (restart_tx, mut restart_rx) = mpsc::unbounded_channel();
        let callbacks = Arc::new(RestartMonitor::new(
            Arc::new(LogSink::new(sink_metrics)),
            move |reason| {
                let _ = restart_tx.send(reason);
            },
        ));

        let syncer = match kind {
            SyncerKind::Felix => {
                let services = include_services.then(|| calico.clone());
                calico_syncer_felix::new(calico, services, callbacks, federation)?
            }
            SyncerKind::FederatedServices => {
                calico_syncer_felix::services::new(calico.clone(), calico, callbacks, federation)?
            }
        };
        syncer.start();
        info!(syncer = ?kind, "Started");

        tokio::select! {
            res = runtime.run() => {
                syncer.stop().await;
                if res.is_err() {
                    bail!("Aborted");
                }
                Ok(())
            }
            Some(reason) = restart_rx.recv() => {
                warn!(%reason, "Stopping to apply remote cluster configuration");
                syncer.stop().await;
                bail!("Restart required: {reason}");
            }
        }
    }
}
