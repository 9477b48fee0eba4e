use crate::sink::{LogSink, SinkMetrics};
use calico_syncer_core::{
    Error, KVPair, Key, RemoteClusterStatusType, SyncStatus, SyncerCallbacks, Update, UpdateType,
    Value,
};

#[tokio::test(flavor = "current_thread")]
async fn sink_counts_what_it_logs() {
    let metrics = SinkMetrics::default();
    let sink = LogSink::new(metrics.clone());

    sink.on_status_updated(SyncStatus::ResyncInProgress).await;
    assert_eq!(metrics.in_sync(), 0);

    let host = Key::HostIp {
        hostname: "node-1".to_string(),
    };
    sink.on_updates(vec![
        Update::new(
            KVPair::new(host.clone(), Value::HostIp([10, 0, 0, 1].into())),
            UpdateType::New,
        ),
        Update::remote_cluster_status(
            "cluster-a",
            UpdateType::New,
            RemoteClusterStatusType::Connecting,
            None,
        ),
    ])
    .await;
    sink.on_status_updated(SyncStatus::InSync).await;
    assert_eq!(metrics.in_sync(), 1);

    sink.on_updates(vec![Update::new(KVPair::deleted(host), UpdateType::Deleted)])
        .await;
    assert_eq!(metrics.updates(UpdateType::New), 2);
    assert_eq!(metrics.updates(UpdateType::Deleted), 1);
    assert_eq!(metrics.updates(UpdateType::Updated), 0);

    sink.on_connection_failed(&Error::Datastore("connection refused".to_string()))
        .await;
    assert_eq!(metrics.connection_failures(), 1);
}
