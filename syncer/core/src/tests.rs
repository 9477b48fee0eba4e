use super::*;
use futures::prelude::*;
use maplit::btreemap;
use pretty_assertions::assert_eq;

fn profile(name: &str) -> k8s::Profile {
    k8s::Profile::new(
        name,
        k8s::projectcalico::ProfileSpec {
            labels_to_apply: btreemap! { "team".to_string() => name.to_string() },
            ..Default::default()
        },
    )
}

#[test]
fn key_paths() {
    let cases = vec![
        (
            Key::HostEndpoint {
                hostname: "cluster-a/node-1".to_string(),
                endpoint_id: "eth0".to_string(),
            },
            "/calico/v1/host/cluster-a/node-1/endpoint/eth0",
        ),
        (
            Key::WorkloadEndpoint {
                hostname: "node-1".to_string(),
                orchestrator_id: "k8s".to_string(),
                workload_id: "default/pod-1".to_string(),
                endpoint_id: "eth0".to_string(),
            },
            "/calico/v1/host/node-1/workload/k8s/default%2fpod-1/endpoint/eth0",
        ),
        (
            Key::Block {
                cidr: "10.0.1.0/26".parse().unwrap(),
            },
            "/calico/ipam/v2/assignment/ipv4/block/10.0.1.0-26",
        ),
        (
            Key::Resource(ResourceKey::namespaced("WorkloadEndpoint", "ns", "wep")),
            "/calico/resources/v3/projectcalico.org/workloadendpoint/ns/wep",
        ),
        (
            Key::remote_cluster_status("cluster-a"),
            "/calico/felix/v2/remotecluster/cluster-a/status",
        ),
    ];
    for (key, path) in cases {
        assert_eq!(key.to_string(), path);
    }
}

#[test]
fn list_options_match_kind_and_namespace() {
    let opts = ListOptions::Resource(ResourceListOptions {
        kind: "WorkloadEndpoint".to_string(),
        namespace: Some("ns-a".to_string()),
        name: None,
    });
    assert!(opts.matches(&ResourceKey::namespaced("WorkloadEndpoint", "ns-a", "a").into()));
    assert!(!opts.matches(&ResourceKey::namespaced("WorkloadEndpoint", "ns-b", "a").into()));
    assert!(!opts.matches(&ResourceKey::new("HostEndpoint", "a").into()));
    assert!(ListOptions::Blocks.matches(&Key::Block {
        cidr: "10.0.0.0/26".parse().unwrap()
    }));
}

#[test]
fn deleted_status_carries_no_value() {
    let update = Update::remote_cluster_status(
        "cluster-a",
        UpdateType::Deleted,
        RemoteClusterStatusType::ConnectionFailed,
        Some("ignored".to_string()),
    );
    assert_eq!(update.kv.value, None);

    let update = Update::remote_cluster_status(
        "cluster-a",
        UpdateType::New,
        RemoteClusterStatusType::Connecting,
        None,
    );
    assert_eq!(
        update.value().and_then(Value::as_remote_cluster_status),
        Some(&RemoteClusterStatus::new(RemoteClusterStatusType::Connecting))
    );
}

#[test]
fn datastore_types() {
    assert_eq!("etcdv3".parse::<DatastoreType>(), Ok(DatastoreType::EtcdV3));
    assert_eq!(
        "kubernetes".parse::<DatastoreType>(),
        Ok(DatastoreType::Kubernetes)
    );
    assert!("consul".parse::<DatastoreType>().is_err());
}

#[tokio::test]
async fn memory_list_and_watch() {
    let client = memory::MemoryClient::new();
    let a = client
        .apply(KVPair::from_resource(profile("a")))
        .expect("apply must succeed");
    assert_eq!(a.revision, "1");

    let opts = ListOptions::resource(k8s::kinds::PROFILE);
    let list = client.list(&opts, "").await.expect("list must succeed");
    assert_eq!(list.items, vec![a.clone()]);
    assert_eq!(list.revision, "1");

    let mut watch = client
        .watch(&opts, &list.revision)
        .await
        .expect("watch must succeed");

    let b = client
        .apply(KVPair::from_resource(profile("b")))
        .expect("apply must succeed");
    assert_eq!(watch.next().await, Some(WatchEvent::Added(b)));

    let a2 = client
        .apply(KVPair::from_resource(profile("a")))
        .expect("apply must succeed");
    assert_eq!(watch.next().await, Some(WatchEvent::Modified(a2)));

    let deleted = client.remove(&a.key).expect("remove must succeed");
    assert_eq!(deleted.revision, "4");
    assert_eq!(watch.next().await, Some(WatchEvent::Deleted(deleted)));
}

#[tokio::test]
async fn memory_watch_replays_from_revision() {
    let client = memory::MemoryClient::new();
    let a = client
        .apply(KVPair::from_resource(profile("a")))
        .expect("apply must succeed");
    let b = client
        .apply(KVPair::from_resource(profile("b")))
        .expect("apply must succeed");

    let opts = ListOptions::resource(k8s::kinds::PROFILE);
    let mut watch = client.watch(&opts, "0").await.expect("watch must succeed");
    assert_eq!(watch.next().await, Some(WatchEvent::Added(a)));
    assert_eq!(watch.next().await, Some(WatchEvent::Added(b)));
}

#[tokio::test]
async fn memory_unavailable_interrupts_watches() {
    let client = memory::MemoryClient::new();
    let opts = ListOptions::resource(k8s::kinds::PROFILE);
    let mut watch = client.watch(&opts, "").await.expect("watch must succeed");

    let error = Error::Datastore("down".to_string());
    client.set_unavailable(Some(error.clone()));
    assert_eq!(watch.next().await, Some(WatchEvent::Error(error.clone())));
    assert_eq!(client.list(&opts, "").await, Err(error));

    client.set_unavailable(None);
    assert!(client.list(&opts, "").await.is_ok());
}

#[tokio::test]
async fn memory_update_checks_revision() {
    let client = memory::MemoryClient::new();
    let a = client
        .apply(KVPair::from_resource(profile("a")))
        .expect("apply must succeed");

    let stale = a.clone().with_revision("0");
    assert_eq!(
        client.update(stale).await,
        Err(Error::ResourceUpdateConflict(a.key.to_string()))
    );
    let updated = client.update(a.clone()).await.expect("update must succeed");
    assert_eq!(updated.revision, "2");

    client.clean().await.expect("clean must succeed");
    assert!(client.is_empty());
}

#[tokio::test]
async fn memory_factory_sessions() {
    let factory = memory::MemoryClientFactory::default();
    let store = memory::MemoryClient::new();
    factory.insert("https://remote-a:2379", store.clone());

    let config = CalicoApiConfig {
        datastore_type: DatastoreType::EtcdV3,
        etcd: apiconfig::EtcdConfig {
            endpoints: "https://remote-a:2379".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let client = factory
        .create_client(&config)
        .await
        .expect("client must be created");
    client.close().await.expect("close must succeed");

    // Closing a session leaves the store usable through other sessions.
    let opts = ListOptions::resource(k8s::kinds::PROFILE);
    assert_eq!(client.list(&opts, "").await, Err(Error::Closed));
    assert!(store.list(&opts, "").await.is_ok());

    let missing = CalicoApiConfig {
        etcd: apiconfig::EtcdConfig {
            endpoints: "https://remote-b:2379".to_string(),
            ..Default::default()
        },
        ..config
    };
    assert!(factory.create_client(&missing).await.is_err());
    assert_eq!(factory.attempts(), 2);
}
