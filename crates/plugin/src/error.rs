//! Error type for the injected module

use modhost_core::{BridgeError, HookError};
use modhost_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Module lookup failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Hook installation failed: {0}")]
    Hook(#[from] HookError),

    #[error("Extension bridge unavailable: {0}")]
    Bridge(#[from] BridgeError),
}
