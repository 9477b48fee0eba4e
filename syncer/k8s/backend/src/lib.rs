#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A Calico datastore client backed by the Kubernetes API.

mod client;
mod factory;
mod resources;
mod secrets;

pub use self::{client::KubeClient, factory::KubeClientFactory, secrets::KubeSecrets};
use calico_syncer_core::Error;
use std::fmt;

/// Maps a Kubernetes API error onto the datastore error model.
fn api_error(error: kube::Error, what: impl fmt::Display) -> Error {
    match error {
        kube::Error::Api(response) => match response.code {
            404 => Error::ResourceDoesNotExist(what.to_string()),
            401 | 403 => Error::ConnectionUnauthorized(response.message),
            409 if response.reason == "AlreadyExists" => {
                Error::ResourceAlreadyExists(what.to_string())
            }
            409 => Error::ResourceUpdateConflict(what.to_string()),
            _ => Error::Datastore(response.to_string()),
        },
        error => Error::Datastore(error.to_string()),
    }
}

#[cfg(test)]
mod tests;
