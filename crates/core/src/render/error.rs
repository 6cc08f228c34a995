//! Error type for render pipeline operations

use crate::hooks::HookError;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A dispatch table entry we need is missing or null
    #[error("Dispatch slot {0} is unavailable")]
    MissingSlot(&'static str),

    /// The host handed us a null object
    #[error("Null {0} object")]
    NullObject(&'static str),

    /// The throwaway swap chain could not be created
    #[error("Swap chain probe failed: {0}")]
    Probe(String),

    #[error("Render target creation failed: {0}")]
    RenderTarget(String),

    #[error("Hook installation failed: {0}")]
    Hook(#[from] HookError),

    /// Event arrived in a state that cannot handle it
    #[error("Pipeline cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
}
