//! Error types for host module discovery

/// Error type for module and symbol lookups
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Module is neither resident nor loadable
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Module is loaded but does not export the symbol
    #[error("Symbol {symbol} not found in {module}")]
    SymbolNotFound { module: String, symbol: String },

    /// Symbol name was not a valid C string
    #[error("Invalid symbol name: {0}")]
    InvalidSymbolName(String),

    /// Host globals already initialized
    #[error("Host already initialized")]
    AlreadyInitialized,
}
