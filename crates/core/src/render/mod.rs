//! Render pipeline interception
//!
//! Backend-neutral state machines for the D3D11 and D3D9 paths. The native
//! COM calls live behind [`Dx11Device`] and [`Dx9Device`]; hooks are
//! installed through a [`HookInstaller`].

mod d3d11;
mod d3d9;
mod dispatch;
mod error;
mod overlay;

pub use d3d11::{Dx11Device, Dx11Pipeline, Dx11State};
pub use d3d9::{Dx9Device, Dx9Pipeline, Dx9State};
pub use dispatch::{DispatchSlot, DispatchTable, HookInstaller};
pub use error::RenderError;
pub use overlay::{drive_frame, OverlayFront, OverlayRenderer, OverlaySlot};
