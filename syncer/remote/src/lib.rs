#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Federation of remote clusters into a local syncer's output.
//!
//! [`RemoteClusterCallbacks`] wraps the callbacks of a syncer that watches
//! `RemoteClusterConfiguration` resources. For each configuration it starts a
//! syncer against the remote cluster's datastore, rewrites that syncer's
//! updates into the local key space and reports the remote's progress as
//! `RemoteClusterStatus` updates.

mod endpoint;
mod federation;
mod metrics;
mod restart;
pub mod secret;

pub use self::{
    federation::{FederationBuilder, RemoteClusterCallbacks, RemoteClusterInterface},
    metrics::RemoteClusterMetrics,
    restart::RestartMonitor,
    secret::{MemorySecrets, SecretBackend, SecretData, SecretEvent, SecretRef, SecretWatcher},
};
