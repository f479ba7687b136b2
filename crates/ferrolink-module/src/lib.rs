//! # Ferrolink Module
//!
//! Lifecycle management for dynamically loaded modules: integrity
//! verification, a bounded registry with replace-in-slot semantics, and
//! execution through a pluggable loader. The default loader runs
//! WebAssembly modules under wasmtime with fuel metering and a wall
//! clock deadline.

#![warn(missing_docs)]

/// The module registry
pub mod manager;

/// Loader abstraction over module formats
pub mod loader;

/// WebAssembly loader backed by wasmtime
pub mod wasm;

/// Module error types
pub mod error;

pub use error::ModuleError;
pub use loader::{ModuleHandle, ModuleLoader};
pub use manager::{ExecOutcome, ModuleInfo, ModuleManager};
pub use wasm::{WasmConfig, WasmLoader};

/// Default number of module slots in a registry.
pub const DEFAULT_CAPACITY: usize = 64;
