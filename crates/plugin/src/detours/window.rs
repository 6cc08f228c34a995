//! Host window subclassing
//!
//! `CreateWindowExW` is hooked to spot the host's main window. Once seen,
//! its message procedure is replaced by [`window_proc`], which routes every
//! message through the overlay before the host sees it.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    CallWindowProcW, DefWindowProcW, GetClassNameW, GetCursor, SetCursor, SetWindowLongPtrW,
    GWLP_WNDPROC, HCURSOR,
};

use modhost_core::config::WindowConfig;
use modhost_core::{
    route_message_guarded, HookContext, HookError, HookSlot, InlinePatcher, OverlayFront, WindowHook,
    WindowHost, WindowMessage,
};
use modhost_engine::loader::{require_module, resolve_symbol};
use modhost_engine::{EngineError, SystemModules};

use crate::bridge_loader::bridge;
use crate::overlay::overlay;

const USER32: &str = "user32.dll";

type CreateWindowExWFn = unsafe extern "system" fn(
    ex_style: u32,
    class_name: *const u16,
    window_name: *const u16,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: *mut c_void,
    menu: *mut c_void,
    instance: *mut c_void,
    param: *const c_void,
) -> *mut c_void;

type WndProcFn = unsafe extern "system" fn(HWND, u32, WPARAM, LPARAM) -> LRESULT;

static CREATE_WINDOW_EX_W: HookSlot<CreateWindowExWFn> = HookSlot::new("CreateWindowExW");
static WINDOW: OnceLock<WindowHook> = OnceLock::new();

pub fn init(config: &WindowConfig) {
    let _ = WINDOW.set(WindowHook::new(config.class_name.clone()));
}

/// Address of `CreateWindowExW`
pub fn target() -> Result<usize, EngineError> {
    let user32 = require_module(&SystemModules, USER32)?;
    resolve_symbol(&SystemModules, user32, USER32, b"CreateWindowExW\0")
}

/// Queue the `CreateWindowExW` hook
///
/// # Safety
/// `target` must be the address returned by [`target`].
pub unsafe fn attach(ctx: &mut HookContext<InlinePatcher>, target: usize) -> Result<(), HookError> {
    CREATE_WINDOW_EX_W.attach(ctx, target, create_window_ex_w as CreateWindowExWFn)
}

/// Forget a queued hook whose batch was rolled back
pub fn settle(ctx: &HookContext<InlinePatcher>) {
    CREATE_WINDOW_EX_W.settle(ctx);
}

/// The host's main window, once created
pub fn host_window() -> Option<usize> {
    WINDOW.get()?.hwnd()
}

/// Put the host's message procedure back
pub fn restore() {
    if let Some(hook) = WINDOW.get() {
        hook.restore(|hwnd, original| unsafe {
            SetWindowLongPtrW(hwnd_of(hwnd), GWLP_WNDPROC, original as _) != 0
        });
    }
}

fn hwnd_of(hwnd: usize) -> HWND {
    HWND(hwnd as *mut c_void)
}

fn class_name_of(hwnd: usize) -> Option<String> {
    let mut buffer = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd_of(hwnd), &mut buffer) };
    (len > 0).then(|| String::from_utf16_lossy(&buffer[..len as usize]))
}

fn subclass(hwnd: usize) -> Option<usize> {
    let replacement = window_proc as WndProcFn as usize;
    let previous = unsafe { SetWindowLongPtrW(hwnd_of(hwnd), GWLP_WNDPROC, replacement as _) };
    (previous != 0).then_some(previous as usize)
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_window_ex_w(
    ex_style: u32,
    class_name: *const u16,
    window_name: *const u16,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: *mut c_void,
    menu: *mut c_void,
    instance: *mut c_void,
    param: *const c_void,
) -> *mut c_void {
    let Some(original) = CREATE_WINDOW_EX_W.original() else {
        return std::ptr::null_mut();
    };
    let hwnd = original(
        ex_style,
        class_name,
        window_name,
        style,
        x,
        y,
        width,
        height,
        parent,
        menu,
        instance,
        param,
    );

    if let Some(hook) = WINDOW.get() {
        let hwnd = hwnd as usize;
        let _ = catch_unwind(AssertUnwindSafe(|| {
            hook.observe_created(hwnd, class_name_of, subclass)
        }));
    }
    hwnd
}

/// The host side of the subclassed window
struct Win32Window {
    original: Option<usize>,
}

impl WindowHost for Win32Window {
    fn call_original(&self, message: &WindowMessage) -> isize {
        let hwnd = hwnd_of(message.hwnd);
        let (wparam, lparam) = (WPARAM(message.wparam), LPARAM(message.lparam));
        unsafe {
            match self.original {
                Some(proc) => {
                    let proc = std::mem::transmute::<usize, WndProcFn>(proc);
                    CallWindowProcW(Some(proc), hwnd, message.msg, wparam, lparam).0
                }
                None => DefWindowProcW(hwnd, message.msg, wparam, lparam).0,
            }
        }
    }

    fn default_proc(&self, message: &WindowMessage) -> isize {
        unsafe {
            DefWindowProcW(
                hwnd_of(message.hwnd),
                message.msg,
                WPARAM(message.wparam),
                LPARAM(message.lparam),
            )
            .0
        }
    }

    fn cursor(&self) -> usize {
        unsafe { GetCursor() }.0 as usize
    }

    fn set_cursor(&self, cursor: usize) {
        unsafe {
            SetCursor(HCURSOR(cursor as *mut c_void));
        }
    }
}

unsafe extern "system" fn window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let message = WindowMessage {
        hwnd: hwnd.0 as usize,
        msg,
        wparam: wparam.0,
        lparam: lparam.0,
    };
    let host = Win32Window {
        original: WINDOW.get().and_then(WindowHook::original_proc),
    };

    // The overlay lock is never held while the host runs: its procedure may
    // reset the device or present a frame. A busy overlay passes messages on.
    let mut front = OverlayFront::new(overlay(), || bridge().is_overlay_visible());
    LRESULT(route_message_guarded(&host, Some(&mut front), &message))
}
