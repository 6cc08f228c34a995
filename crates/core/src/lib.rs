//! modhost - Core Logic
//!
//! Everything that decides what the injected module does, kept free of
//! host-specific FFI so it can be exercised in isolation:
//!
//! - [`hooks`] - transactional inline hooks
//! - [`files`] - resource substitution for file opens
//! - [`window`] - message routing for the host window
//! - [`render`] - D3D11 and D3D9 pipeline state machines
//! - [`bridge`] - entry points into the extension runtime
//! - [`config`] - `core.toml`
//!
//! # Re-exports
//!
//! - [`sdk`] - boundary types, names and dispatch indices
//! - [`engine`] - module discovery, backend detection, host globals

use tracing::info;

pub use modhost_engine as engine;
pub use modhost_sdk as sdk;

pub mod bridge;
pub mod config;
pub mod files;
pub mod hooks;
pub mod render;
pub mod window;

pub use bridge::{BridgeError, BridgeResult, InvokeError, ManagedBridge};
pub use config::{ConfigError, ConfigResult, CoreConfig};
pub use files::{FileRedirectState, FileRedirector, OpenRoute, ResourceGenerator};
pub use hooks::{hooks, HookContext, HookError, HookKey, HookSlot, InlinePatcher};
pub use render::{
    DispatchSlot, DispatchTable, Dx11Device, Dx11Pipeline, Dx9Device, Dx9Pipeline, HookInstaller,
    OverlayFront, OverlayRenderer, OverlaySlot, RenderError,
};
pub use window::{
    route_message, route_message_guarded, OverlayInput, WindowHook, WindowHookState, WindowHost, WindowMessage,
};

/// Remove every installed hook
///
/// Called on process detach. Safe to call repeatedly.
pub fn shutdown() {
    info!("modhost shutting down...");
    if let Err(e) = hooks().detach_all() {
        tracing::error!("Failed to remove hooks: {}", e);
    }
}
