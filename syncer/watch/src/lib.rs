#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod syncer;

pub use self::syncer::{ResourceType, WatcherSyncer};
