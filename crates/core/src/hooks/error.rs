//! Error type for hook operations

/// Error type for hook operations
///
/// Variants produced while other threads are frozen carry no heap data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("No hook transaction is open")]
    NoTransaction,

    #[error("A hook transaction is already open")]
    TransactionOpen,

    #[error("Hook not found")]
    NotFound,

    #[error("Target {0:#x} is already hooked")]
    AlreadyHooked(usize),

    #[error("Invalid address: {0:#x}")]
    InvalidAddress(usize),

    #[error("Function at {0:#x} is too short to patch")]
    TooShort(usize),

    #[error("Instruction relocation failed: {0}")]
    RelocationFailed(String),

    #[error("No trampoline memory within jump range of {0:#x}")]
    TrampolineAlloc(usize),

    #[error("Memory protection failed at {0:#x}")]
    ProtectFailed(usize),

    #[error("Failed to suspend threads: {0}")]
    ThreadSuspend(String),

    #[error("Hook '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: Box<HookError>,
    },
}

impl HookError {
    /// Attach the name of the hook that failed
    pub(crate) fn named(self, name: &str) -> Self {
        match self {
            err @ HookError::Failed { .. } => err,
            err => HookError::Failed {
                name: name.to_string(),
                source: Box::new(err),
            },
        }
    }
}
