use windows::core::Interface;
use windows::Win32::Graphics::Direct3D9::{IDirect3DDevice9, D3DPRESENT_PARAMETERS};

use modhost_core::render::{DispatchSlot, DispatchTable, Dx9Device, RenderError};

/// Device captured from `IDirect3D9::CreateDevice`
pub struct NativeDx9 {
    device: IDirect3DDevice9,
}

// The pipeline only touches the device from the host's render thread
unsafe impl Send for NativeDx9 {}

impl NativeDx9 {
    pub fn new(device: IDirect3DDevice9) -> Self {
        Self { device }
    }
}

/// Snapshot of the parameters a device was created or reset with
#[derive(Clone, Copy)]
pub struct PresentParams(pub D3DPRESENT_PARAMETERS);

unsafe impl Send for PresentParams {}

impl PresentParams {
    /// # Safety
    /// `params` must be null or point to valid parameters.
    pub unsafe fn read(params: *const D3DPRESENT_PARAMETERS) -> Option<Self> {
        params.as_ref().map(|p| Self(*p))
    }
}

impl Dx9Device for NativeDx9 {
    type Params = PresentParams;

    fn dispatch(&self) -> Result<DispatchTable, RenderError> {
        unsafe {
            DispatchTable::resolve(
                self.device.as_raw(),
                &[DispatchSlot::EndScene, DispatchSlot::Reset],
            )
        }
    }
}
