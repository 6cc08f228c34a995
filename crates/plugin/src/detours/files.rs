//! `CreateFileW` replacement

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::INVALID_HANDLE_VALUE;

use modhost_core::config::RedirectConfig;
use modhost_core::{hooks, FileRedirector, HookSlot, OpenRoute};
use modhost_engine::loader::{require_module, resolve_symbol};
use modhost_engine::SystemModules;

use crate::bridge_loader::run_generator;
use crate::error::PluginError;

const KERNEL32: &str = "kernel32.dll";

type CreateFileWFn = unsafe extern "system" fn(
    file_name: *const u16,
    desired_access: u32,
    share_mode: u32,
    security_attributes: *const c_void,
    creation_disposition: u32,
    flags_and_attributes: u32,
    template_file: *mut c_void,
) -> *mut c_void;

static CREATE_FILE_W: HookSlot<CreateFileWFn> = HookSlot::new("CreateFileW");
static REDIRECTOR: OnceLock<FileRedirector<fn() -> bool>> = OnceLock::new();

/// Hook `CreateFileW` in its own transaction
pub fn install(config: &RedirectConfig) -> Result<(), PluginError> {
    let _ = REDIRECTOR.set(FileRedirector::new(config.clone(), run_generator as fn() -> bool));

    let kernel32 = require_module(&SystemModules, KERNEL32)?;
    let target = resolve_symbol(&SystemModules, kernel32, KERNEL32, b"CreateFileW\0")?;

    hooks().transaction(|ctx| unsafe {
        CREATE_FILE_W.attach(ctx, target, create_file_w as CreateFileWFn)
    })?;
    tracing::info!(
        "Watching opens of {} and {}",
        config.trigger,
        config.passthrough
    );
    Ok(())
}

unsafe extern "system" fn create_file_w(
    file_name: *const u16,
    desired_access: u32,
    share_mode: u32,
    security_attributes: *const c_void,
    creation_disposition: u32,
    flags_and_attributes: u32,
    template_file: *mut c_void,
) -> *mut c_void {
    let Some(original) = CREATE_FILE_W.original() else {
        return INVALID_HANDLE_VALUE.0;
    };
    let open = |path: *const u16| {
        original(
            path,
            desired_access,
            share_mode,
            security_attributes,
            creation_disposition,
            flags_and_attributes,
            template_file,
        )
    };

    let Some(redirector) = REDIRECTOR.get() else {
        return open(file_name);
    };
    if file_name.is_null() {
        return open(file_name);
    }
    let Ok(path) = PCWSTR(file_name).to_string() else {
        return open(file_name);
    };

    let route = catch_unwind(AssertUnwindSafe(|| redirector.route(&path)))
        .unwrap_or(OpenRoute::Original);
    match route {
        OpenRoute::Original => open(file_name),
        OpenRoute::Redirect(redirected) => {
            tracing::debug!("Opening {} instead of {}", redirected, path);
            let wide = HSTRING::from(redirected.as_str());
            open(wide.as_ptr())
        }
    }
}
