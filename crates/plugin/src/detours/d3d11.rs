//! D3D11 path: `D3D11CreateDevice`, then `Present` and `ResizeBuffers`

use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::error;
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext};
use windows::Win32::Graphics::Dxgi::IDXGISwapChain;

use modhost_core::render::{DispatchSlot, Dx11Pipeline, HookInstaller, RenderError};
use modhost_core::{hooks, HookContext, HookError, HookSlot, InlinePatcher};
use modhost_engine::Backend;

use crate::bridge_loader::bridge;
use crate::native::NativeDx11;
use crate::overlay::{overlay, BridgeOverlay};

use super::window::host_window;

type D3D11CreateDeviceFn = unsafe extern "system" fn(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    immediate_context: *mut *mut c_void,
) -> HRESULT;

type PresentFn = unsafe extern "system" fn(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT;

type ResizeBuffersFn = unsafe extern "system" fn(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: i32,
    flags: u32,
) -> HRESULT;

static D3D11_CREATE_DEVICE: HookSlot<D3D11CreateDeviceFn> = HookSlot::new("D3D11CreateDevice");
static PRESENT: HookSlot<PresentFn> = HookSlot::new(DispatchSlot::Present.name());
static RESIZE_BUFFERS: HookSlot<ResizeBuffersFn> = HookSlot::new(DispatchSlot::ResizeBuffers.name());

static PIPELINE: LazyLock<Mutex<Dx11Pipeline<NativeDx11>>> =
    LazyLock::new(|| Mutex::new(Dx11Pipeline::new(Arc::clone(overlay()))));

/// Queue the `D3D11CreateDevice` hook
///
/// # Safety
/// `target` must be the address of `D3D11CreateDevice`.
pub unsafe fn attach_factory(
    ctx: &mut HookContext<InlinePatcher>,
    target: usize,
) -> Result<(), HookError> {
    D3D11_CREATE_DEVICE.attach(ctx, target, d3d11_create_device as D3D11CreateDeviceFn)
}

/// Forget queued hooks whose batch was rolled back
pub fn settle(ctx: &HookContext<InlinePatcher>) {
    D3D11_CREATE_DEVICE.settle(ctx);
    PRESENT.settle(ctx);
    RESIZE_BUFFERS.settle(ctx);
}

pub fn release() {
    if let Some(mut pipeline) = PIPELINE.try_lock() {
        pipeline.shutdown();
    }
}

/// Hooks swap chain entries in one transaction
struct SwapChainHooks;

impl HookInstaller for SwapChainHooks {
    fn install(&mut self, entries: &[(DispatchSlot, usize)]) -> Result<(), RenderError> {
        let mut ctx = hooks();
        let result = ctx.transaction(|ctx| {
            for &(slot, target) in entries {
                unsafe {
                    match slot {
                        DispatchSlot::Present => {
                            PRESENT.attach(ctx, target, present as PresentFn)?
                        }
                        DispatchSlot::ResizeBuffers => {
                            RESIZE_BUFFERS.attach(ctx, target, resize_buffers as ResizeBuffersFn)?
                        }
                        _ => return Err(HookError::NotFound),
                    }
                }
            }
            Ok(())
        });
        if result.is_err() {
            settle(&ctx);
        }
        Ok(result?)
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn d3d11_create_device(
    adapter: *mut c_void,
    driver_type: i32,
    software: *mut c_void,
    flags: u32,
    feature_levels: *const i32,
    feature_level_count: u32,
    sdk_version: u32,
    device: *mut *mut c_void,
    feature_level: *mut i32,
    immediate_context: *mut *mut c_void,
) -> HRESULT {
    let Some(original) = D3D11_CREATE_DEVICE.original() else {
        return E_FAIL;
    };
    let result = original(
        adapter,
        driver_type,
        software,
        flags,
        feature_levels,
        feature_level_count,
        sdk_version,
        device,
        feature_level,
        immediate_context,
    );
    if result.is_err() || device.is_null() || immediate_context.is_null() {
        return result;
    }

    let (Some(device), Some(context)) = (
        ID3D11Device::from_raw_borrowed(&*device),
        ID3D11DeviceContext::from_raw_borrowed(&*immediate_context),
    ) else {
        return result;
    };
    let native = NativeDx11::new(device.clone(), context.clone(), host_window());

    let captured = catch_unwind(AssertUnwindSafe(|| {
        PIPELINE
            .lock()
            .on_device_created(native, &mut SwapChainHooks, |_| {
                BridgeOverlay::boxed(Backend::D3D11)
            })
    }));
    match captured {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("D3D11 overlay disabled: {}", e),
        Err(_) => error!("Panic while capturing the D3D11 device"),
    }
    result
}

unsafe extern "system" fn present(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT {
    let Some(original) = PRESENT.original() else {
        return E_FAIL;
    };

    if let Some(swap_chain) = IDXGISwapChain::from_raw_borrowed(&this) {
        // Skip the overlay rather than wait if the pipeline is busy
        if let Some(mut pipeline) = PIPELINE.try_lock() {
            let draw = || bridge().draw();
            let _ = catch_unwind(AssertUnwindSafe(|| {
                pipeline.present(swap_chain, &draw, || ())
            }));
        }
    }
    original(this, sync_interval, flags)
}

unsafe extern "system" fn resize_buffers(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: i32,
    flags: u32,
) -> HRESULT {
    let Some(original) = RESIZE_BUFFERS.original() else {
        return E_FAIL;
    };
    let called = Cell::new(false);
    let call_original = || {
        called.set(true);
        original(this, buffer_count, width, height, format, flags)
    };

    let Some(swap_chain) = IDXGISwapChain::from_raw_borrowed(&this) else {
        return call_original();
    };
    let Some(mut pipeline) = PIPELINE.try_lock() else {
        return call_original();
    };
    match catch_unwind(AssertUnwindSafe(|| pipeline.resize_buffers(swap_chain, call_original))) {
        Ok(result) => result,
        Err(_) => {
            error!("Panic while resizing swap chain buffers");
            if called.get() {
                E_FAIL
            } else {
                call_original()
            }
        }
    }
}
