//! Module, symbol and resource names
//!
//! These strings must match exactly what the host process and the system
//! graphics modules expose.

/// Module whose residency at injection time selects the D3D11 path
pub const D3D11_MODULE: &str = "d3d11.dll";

/// Module loaded on demand to select the D3D9 path
pub const D3D9_MODULE: &str = "d3d9.dll";

/// Device creation export of the D3D11 module
pub const D3D11_CREATE_DEVICE: &[u8] = b"D3D11CreateDevice\0";

/// Factory creation export of the D3D9 module
pub const DIRECT3D_CREATE9_EX: &[u8] = b"Direct3DCreate9Ex\0";

/// Class name of the host's main window
pub const HOST_WINDOW_CLASS: &str = "YYGameMakerYY";

/// Resource whose first open triggers generation (sentinel A)
pub const TRIGGER_RESOURCE: &str = "data.win";

/// Resource name the generator uses to read the unmodified data (sentinel B)
pub const PASSTHROUGH_RESOURCE: &str = "unmodded.win";

/// Name of the unmodified resource on disk
pub const CANONICAL_RESOURCE: &str = "data.win";

/// Name of the generated resource on disk
pub const GENERATED_RESOURCE: &str = "modded.win";

/// Bridge entry point exports
pub const BRIDGE_ENTRY_POINT: &[u8] = b"modhost_entry_point\0";
pub const BRIDGE_CALL: &[u8] = b"modhost_call\0";
pub const BRIDGE_DELETE_RESULT: &[u8] = b"modhost_delete_result\0";
pub const BRIDGE_GET_RESULT_SIZE: &[u8] = b"modhost_get_result_size\0";
pub const BRIDGE_COPY_RESULT: &[u8] = b"modhost_copy_result\0";
pub const BRIDGE_DRAW: &[u8] = b"modhost_draw\0";
pub const BRIDGE_IS_OVERLAY_VISIBLE: &[u8] = b"modhost_is_overlay_visible\0";

/// `WM_SETCURSOR`
pub const WM_SETCURSOR: u32 = 0x0020;
