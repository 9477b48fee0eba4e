/// Errors reported by datastore clients and the syncers built on them.
///
/// Errors are cloneable so that a single failure may be reported to every
/// interested watcher.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("resource does not exist: {0}")]
    ResourceDoesNotExist(String),

    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("update conflict: {0}")]
    ResourceUpdateConflict(String),

    #[error("operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("connection is unauthorized: {0}")]
    ConnectionUnauthorized(String),

    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("watch terminated: {0}")]
    Watch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Indicates that the requested resource kind is unavailable in the
    /// datastore, so that a watch of it should be treated as empty.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::OperationNotSupported(_))
    }
}
