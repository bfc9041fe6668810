//! `tubescribe` crate (library surface).
//!
//! The primary entrypoint is the `tubescribe` binary (HTTP service + one-shot CLI).
//! The router lives here so it can be embedded and exercised in-process.

pub mod server;

pub use tubescribe_core as core;
pub use tubescribe_local as local;
