use super::*;
use crate::{
    factory::kube_config,
    resources::{self, BLOCK},
    secrets::secret_data,
};
use calico_syncer_core::{
    apiconfig::KubeConfig,
    k8s::{kinds, ByteString, Secret},
    CalicoApiConfig, ClientFactory, IpNet, Key, ResourceKey, Value,
};
use kube::{api::DynamicObject, core::ErrorResponse};
use maplit::{btreemap, convert_args};
use pretty_assertions::assert_eq;

fn response(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request failed with {reason}"),
        reason: reason.to_string(),
        code,
    })
}

fn object(json: serde_json::Value) -> DynamicObject {
    serde_json::from_value(json).expect("object must deserialize")
}

#[test]
fn api_errors_map_to_datastore_errors() {
    assert_eq!(
        api_error(response(404, "NotFound"), "hep-1"),
        Error::ResourceDoesNotExist("hep-1".to_string())
    );
    assert_eq!(
        api_error(response(403, "Forbidden"), "hep-1"),
        Error::ConnectionUnauthorized("request failed with Forbidden".to_string())
    );
    assert_eq!(
        api_error(response(409, "AlreadyExists"), "hep-1"),
        Error::ResourceAlreadyExists("hep-1".to_string())
    );
    assert_eq!(
        api_error(response(409, "Conflict"), "hep-1"),
        Error::ResourceUpdateConflict("hep-1".to_string())
    );
    assert!(matches!(
        api_error(response(500, "InternalError"), "hep-1"),
        Error::Datastore(_)
    ));
}

#[test]
fn kinds_are_served_with_their_scope() {
    for kind in [
        kinds::WORKLOAD_ENDPOINT,
        kinds::SERVICE,
        kinds::ENDPOINTS,
    ] {
        assert!(resources::lookup(kind).unwrap().namespaced, "{kind}");
    }
    for kind in [
        kinds::REMOTE_CLUSTER_CONFIGURATION,
        kinds::HOST_ENDPOINT,
        kinds::PROFILE,
        kinds::NODE,
        kinds::IP_POOL,
    ] {
        assert!(!resources::lookup(kind).unwrap().namespaced, "{kind}");
    }

    let block = resources::lookup(BLOCK).unwrap();
    assert_eq!(block.api.kind, kinds::IPAM_BLOCK);
    assert_eq!(block.api.group, "projectcalico.org");

    assert!(resources::lookup("Gateway")
        .err()
        .expect("unknown kinds must fail")
        .is_unsupported());
}

#[test]
fn v1_keys_are_not_stored() {
    let key = Key::HostIp {
        hostname: "node-1".to_string(),
    };
    assert!(resources::locate(&key).err().unwrap().is_unsupported());

    let key = Key::Block {
        cidr: "10.0.1.0/26".parse().unwrap(),
    };
    let location = resources::locate(&key).unwrap();
    assert_eq!(location.kind, BLOCK);
    assert_eq!(location.name, "10-0-1-0-26");
}

#[test]
fn decodes_resources() {
    let obj = object(serde_json::json!({
        "apiVersion": "projectcalico.org/v3",
        "kind": "HostEndpoint",
        "metadata": {
            "name": "hep-1",
            "resourceVersion": "42",
            "labels": { "role": "gateway" },
        },
        "spec": {
            "node": "node-1",
            "interfaceName": "eth0",
        },
    }));

    let kv = resources::decode(kinds::HOST_ENDPOINT, obj).unwrap();
    assert_eq!(
        kv.key,
        Key::Resource(ResourceKey::new(kinds::HOST_ENDPOINT, "hep-1"))
    );
    assert_eq!(kv.revision, "42");
    let Some(Value::Resource(resource)) = kv.value else {
        panic!("expected a resource");
    };
    assert_eq!(
        resource.labels(),
        convert_args!(btreemap!("role" => "gateway"))
    );
}

#[test]
fn decodes_blocks_in_the_v1_model() {
    let obj = object(serde_json::json!({
        "apiVersion": "projectcalico.org/v3",
        "kind": "IPAMBlock",
        "metadata": { "name": "10-0-1-0-30", "resourceVersion": "7" },
        "spec": {
            "cidr": "10.0.1.0/30",
            "affinity": "host:node-1",
            "allocations": [0, null, null, null],
            "unallocated": [1, 2, 3],
            "attributes": [{ "handle_id": "pod-a", "secondary": { "node": "node-1" } }],
        },
    }));

    let kv = resources::decode(BLOCK, obj).unwrap();
    let cidr = "10.0.1.0/30".parse::<IpNet>().unwrap();
    assert_eq!(kv.key, Key::Block { cidr });
    assert_eq!(kv.revision, "7");
    let Some(Value::Block(block)) = kv.value else {
        panic!("expected a block");
    };
    assert_eq!(block.affinity.as_deref(), Some("host:node-1"));
    assert_eq!(block.allocations, vec![Some(0), None, None, None]);
    assert_eq!(block.unallocated, vec![1, 2, 3]);
    assert_eq!(block.attributes[0].handle_id.as_deref(), Some("pod-a"));

    // Written back, the block keeps its derived name.
    let encoded = resources::encode(&kv.key, &Value::Block(block)).unwrap();
    assert_eq!(encoded.metadata.name.as_deref(), Some("10-0-1-0-30"));
    assert_eq!(
        encoded.types.map(|t| t.kind).as_deref(),
        Some(kinds::IPAM_BLOCK)
    );
}

#[test]
fn invalid_objects_are_datastore_errors() {
    let obj = object(serde_json::json!({
        "apiVersion": "projectcalico.org/v3",
        "kind": "IPAMBlock",
        "metadata": { "name": "bad" },
        "spec": { "cidr": "not-a-cidr" },
    }));
    assert!(matches!(
        resources::decode(BLOCK, obj),
        Err(Error::Datastore(_))
    ));
}

#[test]
fn secret_data_is_decoded() {
    let secret = Secret {
        data: Some(btreemap! {
            "kubeconfig".to_string() => ByteString(b"apiVersion: v1".to_vec()),
        }),
        ..Default::default()
    };
    assert_eq!(
        secret_data(secret),
        btreemap! { "kubeconfig".to_string() => b"apiVersion: v1".to_vec() }
    );
    assert!(secret_data(Secret::default()).is_empty());
}

const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: remote
  cluster:
    server: https://10.0.0.1:6443
    insecure-skip-tls-verify: true
users:
- name: syncer
  user:
    token: abc123
contexts:
- name: remote
  context:
    cluster: remote
    user: syncer
current-context: remote
"#;

#[tokio::test(flavor = "current_thread")]
async fn inline_kubeconfig_is_preferred() {
    let config = kube_config(&KubeConfig {
        kubeconfig_inline: KUBECONFIG.to_string(),
        kubeconfig: "/does/not/exist".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    assert_eq!(config.cluster_url.host(), Some("10.0.0.1"));
    assert!(config.accept_invalid_certs);
}

#[tokio::test(flavor = "current_thread")]
async fn api_endpoint_config() {
    let config = kube_config(&KubeConfig {
        api_endpoint: "https://api.remote.example:6443".to_string(),
        insecure_skip_tls_verify: true,
        ..Default::default()
    })
    .await
    .unwrap();
    assert_eq!(config.cluster_url.host(), Some("api.remote.example"));
    assert!(config.accept_invalid_certs);

    assert!(matches!(
        kube_config(&KubeConfig::default()).await,
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        kube_config(&KubeConfig {
            kubeconfig_inline: "clusters: [".to_string(),
            ..Default::default()
        })
        .await,
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn etcd_is_not_supported() {
    let Err(error) = KubeClientFactory::default()
        .create_client(&CalicoApiConfig::default())
        .await
    else {
        panic!("etcd clients must not be created");
    };
    assert_eq!(
        error,
        Error::Datastore("etcdv3 datastore is not supported".to_string())
    );
}
