#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod sink;

pub use self::args::Args;

#[cfg(test)]
mod tests;
