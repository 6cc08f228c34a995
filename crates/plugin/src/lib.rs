//! modhost - Injected Module
//!
//! The library loaded into the host process. `DllMain` wires the core
//! engine to the host: it resolves the extension bridge, hooks file opens,
//! and arms the render hooks of the detected graphics backend. Nothing here
//! ever fails the load; problems degrade to an unmodified host.

#![cfg(windows)]

mod bootstrap;
mod bridge_loader;
mod detours;
mod error;
pub mod ffi;
mod native;
mod overlay;
mod tracing_helper;

use std::ffi::c_void;
use std::panic::catch_unwind;

use windows::Win32::Foundation::{BOOL, HINSTANCE, TRUE};
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

pub use error::PluginError;

/// # Safety
/// Called by the Windows loader only.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn DllMain(module: HINSTANCE, reason: u32, reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => {
            let module = module.0 as usize;
            let _ = catch_unwind(|| bootstrap::attach(module));
        }
        DLL_PROCESS_DETACH => {
            // A non-null reserved pointer means the process is exiting
            let process_exiting = !reserved.is_null();
            let _ = catch_unwind(|| bootstrap::detach(process_exiting));
        }
        _ => {}
    }
    TRUE
}
