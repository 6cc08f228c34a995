use std::ffi::c_void;

use windows::core::Interface;
use windows::Win32::Foundation::{HWND, TRUE};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIFactory1, IDXGISwapChain, DXGI_SWAP_CHAIN_DESC,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};

use modhost_core::render::{DispatchSlot, DispatchTable, Dx11Device, RenderError};

/// Device and immediate context captured from `D3D11CreateDevice`
pub struct NativeDx11 {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    window: Option<usize>,
}

// The pipeline only touches the device from the host's render thread
unsafe impl Send for NativeDx11 {}

impl NativeDx11 {
    /// `window` is the host window the probe swap chain is bound to
    pub fn new(device: ID3D11Device, context: ID3D11DeviceContext, window: Option<usize>) -> Self {
        Self {
            device,
            context,
            window,
        }
    }
}

pub struct RenderTargetView(ID3D11RenderTargetView);

unsafe impl Send for RenderTargetView {}

impl Dx11Device for NativeDx11 {
    type SwapChain = IDXGISwapChain;
    type RenderTarget = RenderTargetView;

    fn probe_swap_chain(&mut self) -> Result<DispatchTable, RenderError> {
        let window = self
            .window
            .ok_or_else(|| RenderError::Probe("host window not created yet".into()))?;

        let factory: IDXGIFactory1 =
            unsafe { CreateDXGIFactory1() }.map_err(|e| RenderError::Probe(e.to_string()))?;

        let desc = DXGI_SWAP_CHAIN_DESC {
            BufferDesc: DXGI_MODE_DESC {
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                ..Default::default()
            },
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: 1,
            OutputWindow: HWND(window as *mut c_void),
            Windowed: TRUE,
            ..Default::default()
        };

        let mut swap_chain: Option<IDXGISwapChain> = None;
        unsafe { factory.CreateSwapChain(&self.device, &desc, &mut swap_chain) }
            .ok()
            .map_err(|e| RenderError::Probe(e.to_string()))?;
        let swap_chain =
            swap_chain.ok_or_else(|| RenderError::Probe("no swap chain returned".into()))?;

        // The swap chain is released on return; its entries stay valid
        unsafe {
            DispatchTable::resolve(
                swap_chain.as_raw(),
                &[DispatchSlot::Present, DispatchSlot::ResizeBuffers],
            )
        }
    }

    fn create_render_target(
        &mut self,
        swap_chain: &IDXGISwapChain,
    ) -> Result<RenderTargetView, RenderError> {
        let back_buffer: ID3D11Texture2D = unsafe { swap_chain.GetBuffer(0) }
            .map_err(|e| RenderError::RenderTarget(e.to_string()))?;

        let mut view = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&back_buffer, None, Some(&mut view))
        }
        .map_err(|e| RenderError::RenderTarget(e.to_string()))?;

        view.map(RenderTargetView)
            .ok_or_else(|| RenderError::RenderTarget("no view returned".into()))
    }

    fn bind_render_target(&mut self, target: &RenderTargetView) {
        unsafe {
            self.context
                .OMSetRenderTargets(Some(&[Some(target.0.clone())]), None);
        }
    }
}
