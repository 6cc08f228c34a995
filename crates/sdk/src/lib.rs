//! modhost SDK - Boundary Type Definitions
//!
//! This crate contains the raw definitions shared by every layer of the
//! loader: the function-pointer signatures of the extension bridge, the
//! dispatch-table slot indices of the graphics interfaces we hook, and the
//! module, symbol and resource names the engine looks for.
//! It has no dependencies and compiles quickly, allowing parallel compilation
//! of dependent crates.
//!
//! # Modules
//!
//! - [`bridge`] - Extension bridge entry point signatures
//! - [`interfaces`] - Graphics interface vtable indices
//! - [`names`] - Module, symbol, window class and resource names

pub mod bridge;
pub mod interfaces;
pub mod names;

pub use bridge::*;
pub use interfaces::*;
