//! modhost Engine - Host Module Discovery and Global Storage
//!
//! This crate handles:
//! - Finding and loading modules in the host process via [`ModuleApi`]
//! - Deciding, exactly once, which graphics backend the host renders with
//! - Storing process-wide host state in thread-safe global statics
//!
//! # Architecture
//!
//! The backend decision is made once during attach via [`detect_backend`]
//! and cached for the process lifetime. Host state captured during attach
//! (module handle, executable directory) lives in [`globals::HostGlobals`], reached
//! through [`try_host()`].
//!
//! # Thread Safety
//!
//! All cached values are written once and are read-only afterward.

pub mod backend;
pub mod error;
pub mod globals;
pub mod loader;

pub use backend::{detect_backend, Backend, BackendChoice, BackendDetector};
pub use error::EngineError;
pub use globals::{init_host, try_host, HostGlobals};
pub use loader::{ModuleApi, ModuleHandle};

#[cfg(windows)]
pub use loader::SystemModules;
