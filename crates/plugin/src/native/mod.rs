//! COM adapters behind the core render traits

pub mod dx11;
pub mod dx9;

pub use dx11::NativeDx11;
pub use dx9::{NativeDx9, PresentParams};
