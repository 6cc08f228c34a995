//! Graphics interface dispatch indices
//!
//! Dispatch table indices of the COM methods we hook. Indices count the
//! three `IUnknown` methods first.

/// `IDXGISwapChain::Present`
pub const SWAP_CHAIN_PRESENT: usize = 8;

/// `IDXGISwapChain::ResizeBuffers`
pub const SWAP_CHAIN_RESIZE_BUFFERS: usize = 13;

/// `IDirect3D9::CreateDevice`
pub const DIRECT3D9_CREATE_DEVICE: usize = 16;

/// `IDirect3DDevice9::Reset`
pub const DEVICE9_RESET: usize = 16;

/// `IDirect3DDevice9::EndScene`
pub const DEVICE9_END_SCENE: usize = 42;
