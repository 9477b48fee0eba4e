use calico_syncer_core::{
    k8s::{
        self, kinds,
        projectcalico::{cidr_to_name, IpamBlockSpec},
    },
    AllocationBlock, Error, IpNet, KVPair, Key, Resource, Value,
};
use kube::api::{ApiResource, DynamicObject};

/// The pseudo-kind under which IPAM blocks are served in the v1 model.
pub(crate) const BLOCK: &str = "Block";

pub(crate) struct Kind {
    pub api: ApiResource,
    pub namespaced: bool,
}

/// Where a key is stored: its kind, namespace and object name.
pub(crate) struct Location<'k> {
    pub kind: &'k str,
    pub namespace: Option<&'k str>,
    pub name: String,
}

pub(crate) fn lookup(kind: &str) -> Result<Kind, Error> {
    let (api, namespaced) = match kind {
        kinds::REMOTE_CLUSTER_CONFIGURATION => (erase::<k8s::RemoteClusterConfiguration>(), false),
        kinds::HOST_ENDPOINT => (erase::<k8s::HostEndpoint>(), false),
        kinds::WORKLOAD_ENDPOINT => (erase::<k8s::WorkloadEndpoint>(), true),
        kinds::PROFILE => (erase::<k8s::Profile>(), false),
        kinds::NODE => (erase::<k8s::Node>(), false),
        kinds::IP_POOL => (erase::<k8s::IpPool>(), false),
        kinds::IPAM_BLOCK | BLOCK => (erase::<k8s::IpamBlock>(), false),
        kinds::SERVICE => (erase::<k8s::Service>(), true),
        kinds::ENDPOINTS => (erase::<k8s::Endpoints>(), true),
        kind => {
            return Err(Error::OperationNotSupported(format!(
                "unknown resource kind {kind}"
            )))
        }
    };
    Ok(Kind { api, namespaced })
}

fn erase<K: kube::Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub(crate) fn locate(key: &Key) -> Result<Location<'_>, Error> {
    match key {
        Key::Resource(resource) => Ok(Location {
            kind: &resource.kind,
            namespace: resource.namespace.as_deref(),
            name: resource.name.clone(),
        }),
        Key::Block { cidr } => Ok(Location {
            kind: BLOCK,
            namespace: None,
            name: cidr_to_name(&cidr.to_string()),
        }),
        key => Err(Error::OperationNotSupported(format!(
            "{} keys are not stored in Kubernetes",
            key.kind()
        ))),
    }
}

/// Decodes an object of `kind` into the pair it is synced as.
pub(crate) fn decode(kind: &str, obj: DynamicObject) -> Result<KVPair, Error> {
    if kind == BLOCK {
        let block = obj.try_parse::<k8s::IpamBlock>().map_err(|error| {
            Error::Datastore(format!("invalid {}: {error}", kinds::IPAM_BLOCK))
        })?;
        return block_kv(block);
    }
    parse(kind, obj).map(KVPair::from_resource)
}

fn parse(kind: &str, obj: DynamicObject) -> Result<Resource, Error> {
    let parsed = match kind {
        kinds::REMOTE_CLUSTER_CONFIGURATION => obj
            .try_parse::<k8s::RemoteClusterConfiguration>()
            .map(Resource::from),
        kinds::HOST_ENDPOINT => obj.try_parse::<k8s::HostEndpoint>().map(Resource::from),
        kinds::WORKLOAD_ENDPOINT => obj.try_parse::<k8s::WorkloadEndpoint>().map(Resource::from),
        kinds::PROFILE => obj.try_parse::<k8s::Profile>().map(Resource::from),
        kinds::NODE => obj.try_parse::<k8s::Node>().map(Resource::from),
        kinds::IP_POOL => obj.try_parse::<k8s::IpPool>().map(Resource::from),
        kinds::IPAM_BLOCK => obj.try_parse::<k8s::IpamBlock>().map(Resource::from),
        kinds::SERVICE => obj.try_parse::<k8s::Service>().map(Resource::from),
        kinds::ENDPOINTS => obj.try_parse::<k8s::Endpoints>().map(Resource::from),
        kind => {
            return Err(Error::OperationNotSupported(format!(
                "unknown resource kind {kind}"
            )))
        }
    };
    parsed.map_err(|error| Error::Datastore(format!("invalid {kind}: {error}")))
}

/// Encodes the value stored at `key` as an object.
pub(crate) fn encode(key: &Key, value: &Value) -> Result<DynamicObject, Error> {
    let json = match (key, value) {
        (Key::Resource(_), Value::Resource(resource)) => to_json(resource)?,
        (Key::Block { .. }, Value::Block(block)) => {
            serde_json::to_value(block_resource(block.clone()))
                .map_err(|error| Error::Datastore(error.to_string()))?
        }
        (key, _) => {
            return Err(Error::InvalidConfig(format!(
                "unexpected value for {key}"
            )))
        }
    };
    serde_json::from_value(json).map_err(|error| Error::Datastore(error.to_string()))
}

fn to_json(resource: &Resource) -> Result<serde_json::Value, Error> {
    let json = match resource {
        Resource::RemoteClusterConfiguration(r) => serde_json::to_value(r),
        Resource::HostEndpoint(r) => serde_json::to_value(r),
        Resource::WorkloadEndpoint(r) => serde_json::to_value(r),
        Resource::Profile(r) => serde_json::to_value(r),
        Resource::Node(r) => serde_json::to_value(r),
        Resource::IpPool(r) => serde_json::to_value(r),
        Resource::IpamBlock(r) => serde_json::to_value(r),
        Resource::Service(r) => serde_json::to_value(r),
        Resource::Endpoints(r) => serde_json::to_value(r),
    };
    json.map_err(|error| Error::Datastore(error.to_string()))
}

/// Converts a v3 `IPAMBlock` into a v1 allocation block.
pub(crate) fn block_kv(block: k8s::IpamBlock) -> Result<KVPair, Error> {
    let revision = block.metadata.resource_version.unwrap_or_default();
    let IpamBlockSpec {
        cidr,
        affinity,
        allocations,
        unallocated,
        attributes,
        deleted,
    } = block.spec;
    let cidr = cidr
        .parse::<IpNet>()
        .map_err(|_| Error::Datastore(format!("invalid block CIDR: {cidr}")))?;

    let block = AllocationBlock {
        cidr,
        affinity,
        allocations,
        unallocated,
        attributes,
        deleted,
    };
    Ok(KVPair::new(Key::Block { cidr }, Value::Block(block)).with_revision(revision))
}

pub(crate) fn block_resource(block: AllocationBlock) -> k8s::IpamBlock {
    let cidr = block.cidr.to_string();
    k8s::IpamBlock::new(
        &cidr_to_name(&cidr),
        IpamBlockSpec {
            cidr,
            affinity: block.affinity,
            allocations: block.allocations,
            unallocated: block.unallocated,
            attributes: block.attributes,
            deleted: block.deleted,
        },
    )
}
