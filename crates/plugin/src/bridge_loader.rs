//! Extension bridge resolution

use std::ffi::CStr;

use tracing::info;

use modhost_core::config::BridgeConfig;
use modhost_core::ManagedBridge;
use modhost_engine::loader::require_module;
use modhost_engine::{try_host, ModuleApi};

use crate::error::PluginError;

static BRIDGE: ManagedBridge = ManagedBridge::new();

/// The process-wide bridge; inert until [`load`] succeeds
pub fn bridge() -> &'static ManagedBridge {
    &BRIDGE
}

/// Load the bridge module and resolve its entry points
///
/// The module path is taken relative to the host executable.
#[tracing::instrument(skip_all)]
pub fn load(api: &dyn ModuleApi, config: &BridgeConfig) -> Result<(), PluginError> {
    let path = match try_host() {
        Some(host) => host.resolve(&config.module),
        None => config.module.clone(),
    };
    let path = path.to_string_lossy();
    let module = require_module(api, &path)?;

    let resolver = |symbol: &[u8]| {
        CStr::from_bytes_with_nul(symbol)
            .ok()
            .and_then(|name| api.symbol(module, name))
    };
    // SAFETY: the bridge module exports these symbols with the signatures
    // declared in modhost_sdk::bridge
    unsafe { BRIDGE.resolve(resolver) }?;

    info!("Extension bridge resolved from {}", path);
    Ok(())
}

/// Resource generator handed to the file redirector
pub fn run_generator() -> bool {
    BRIDGE.entry_point()
}
