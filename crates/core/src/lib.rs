//! revdep-core
//!
//! Core library for discovering which on-device binaries depend on a given
//! Android shared library.
//!
//! This crate defines the artifact model, the persisted catalog, the per-artifact
//! dependency resolvers (ELF and bytecode), the shared worker pool, graph
//! assembly with closure extraction, and the DOT exporter.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends; the `revdep` CLI is a thin wrapper.

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod decompiler;
pub mod device;
pub mod discovery;
pub mod elf;
pub mod export;
pub mod graph;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
