//! D3D9 path: `Direct3DCreate9Ex`, then `CreateDevice`, then `EndScene`
//! and `Reset`

use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::error;
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D9::{IDirect3DDevice9, D3DPRESENT_PARAMETERS};

use modhost_core::render::{DispatchSlot, DispatchTable, Dx9Pipeline, HookInstaller, RenderError};
use modhost_core::{hooks, HookContext, HookError, HookSlot, InlinePatcher};
use modhost_engine::Backend;

use crate::bridge_loader::bridge;
use crate::native::{NativeDx9, PresentParams};
use crate::overlay::{overlay, BridgeOverlay};

type Direct3DCreate9ExFn =
    unsafe extern "system" fn(sdk_version: u32, factory: *mut *mut c_void) -> HRESULT;

type CreateDeviceFn = unsafe extern "system" fn(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    params: *mut D3DPRESENT_PARAMETERS,
    device: *mut *mut c_void,
) -> HRESULT;

type EndSceneFn = unsafe extern "system" fn(this: *mut c_void) -> HRESULT;

type ResetFn =
    unsafe extern "system" fn(this: *mut c_void, params: *mut D3DPRESENT_PARAMETERS) -> HRESULT;

static DIRECT3D_CREATE9_EX: HookSlot<Direct3DCreate9ExFn> = HookSlot::new("Direct3DCreate9Ex");
static CREATE_DEVICE: HookSlot<CreateDeviceFn> = HookSlot::new(DispatchSlot::CreateDevice.name());
static END_SCENE: HookSlot<EndSceneFn> = HookSlot::new(DispatchSlot::EndScene.name());
static RESET: HookSlot<ResetFn> = HookSlot::new(DispatchSlot::Reset.name());

static PIPELINE: LazyLock<Mutex<Dx9Pipeline<NativeDx9>>> =
    LazyLock::new(|| Mutex::new(Dx9Pipeline::new(Arc::clone(overlay()))));

/// Queue the `Direct3DCreate9Ex` hook
///
/// # Safety
/// `target` must be the address of `Direct3DCreate9Ex`.
pub unsafe fn attach_factory(
    ctx: &mut HookContext<InlinePatcher>,
    target: usize,
) -> Result<(), HookError> {
    DIRECT3D_CREATE9_EX.attach(ctx, target, direct3d_create9_ex as Direct3DCreate9ExFn)
}

/// Forget queued hooks whose batch was rolled back
pub fn settle(ctx: &HookContext<InlinePatcher>) {
    DIRECT3D_CREATE9_EX.settle(ctx);
    CREATE_DEVICE.settle(ctx);
    END_SCENE.settle(ctx);
    RESET.settle(ctx);
}

pub fn release() {
    if let Some(mut pipeline) = PIPELINE.try_lock() {
        pipeline.shutdown();
    }
}

/// Hooks factory and device entries in one transaction
struct Dx9Hooks;

impl HookInstaller for Dx9Hooks {
    fn install(&mut self, entries: &[(DispatchSlot, usize)]) -> Result<(), RenderError> {
        let mut ctx = hooks();
        let result = ctx.transaction(|ctx| {
            for &(slot, target) in entries {
                unsafe {
                    match slot {
                        DispatchSlot::CreateDevice => {
                            CREATE_DEVICE.attach(ctx, target, create_device as CreateDeviceFn)?
                        }
                        DispatchSlot::EndScene => {
                            END_SCENE.attach(ctx, target, end_scene as EndSceneFn)?
                        }
                        DispatchSlot::Reset => RESET.attach(ctx, target, reset as ResetFn)?,
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

fn report(stage: &str, outcome: std::thread::Result<Result<(), RenderError>>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("D3D9 overlay disabled at {}: {}", stage, e),
        Err(_) => error!("Panic while handling {}", stage),
    }
}

unsafe extern "system" fn direct3d_create9_ex(sdk_version: u32, factory: *mut *mut c_void) -> HRESULT {
    let Some(original) = DIRECT3D_CREATE9_EX.original() else {
        return E_FAIL;
    };
    let result = original(sdk_version, factory);
    if result.is_err() || factory.is_null() {
        return result;
    }

    let object = *factory as *const c_void;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let table = DispatchTable::resolve(object, &[DispatchSlot::CreateDevice])?;
        PIPELINE.lock().on_factory_created(table, &mut Dx9Hooks)
    }));
    report("Direct3DCreate9Ex", outcome);
    result
}

unsafe extern "system" fn create_device(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    params: *mut D3DPRESENT_PARAMETERS,
    device: *mut *mut c_void,
) -> HRESULT {
    let Some(original) = CREATE_DEVICE.original() else {
        return E_FAIL;
    };
    let result = original(this, adapter, device_type, focus_window, behavior_flags, params, device);
    if result.is_err() || device.is_null() {
        return result;
    }
    let Some(created) = IDirect3DDevice9::from_raw_borrowed(&*device) else {
        return result;
    };
    // Parameters are in/out; read them after the call
    let snapshot = PresentParams::read(params).unwrap_or(PresentParams(Default::default()));

    let native = NativeDx9::new(created.clone());
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        PIPELINE
            .lock()
            .on_device_created(native, snapshot, &mut Dx9Hooks, |_| {
                BridgeOverlay::boxed(Backend::D3D9)
            })
    }));
    report("CreateDevice", outcome);
    result
}

unsafe extern "system" fn end_scene(this: *mut c_void) -> HRESULT {
    let Some(original) = END_SCENE.original() else {
        return E_FAIL;
    };

    if let Some(mut pipeline) = PIPELINE.try_lock() {
        let draw = || bridge().draw();
        let _ = catch_unwind(AssertUnwindSafe(|| pipeline.end_scene(&draw, || ())));
    }
    original(this)
}

unsafe extern "system" fn reset(this: *mut c_void, params: *mut D3DPRESENT_PARAMETERS) -> HRESULT {
    let Some(original) = RESET.original() else {
        return E_FAIL;
    };
    let called = Cell::new(false);
    let call_original = || {
        called.set(true);
        original(this, params)
    };

    let Some(mut pipeline) = PIPELINE.try_lock() else {
        return call_original();
    };
    let snapshot = PresentParams::read(params);
    let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.reset(snapshot, call_original)));
    match outcome {
        Ok(result) => result,
        Err(_) => {
            error!("Panic while resetting the D3D9 device");
            if called.get() {
                E_FAIL
            } else {
                call_original()
            }
        }
    }
}
