//! Host window message interposition
//!
//! [`WindowHook`] watches window creation and subclasses the first window
//! whose class matches the host's. [`route_message`] is the body of the
//! replacement message procedure: it gives the overlay first look at every
//! message while keeping the host's cursor and, when the overlay holds the
//! pointer, keeping pointer input away from the host.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use modhost_sdk::names::WM_SETCURSOR;

/// One message as delivered to a window procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub hwnd: usize,
    pub msg: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// Operations on the host side of the subclassed window
pub trait WindowHost {
    /// Run the host's own message procedure
    fn call_original(&self, message: &WindowMessage) -> isize;

    /// Default processing, bypassing the host
    fn default_proc(&self, message: &WindowMessage) -> isize;

    /// Currently active cursor
    fn cursor(&self) -> usize;

    fn set_cursor(&self, cursor: usize);
}

/// Input side of the overlay
pub trait OverlayInput {
    /// Whether the overlay is shown to the user
    fn is_visible(&self) -> bool;

    /// Feed a message to the overlay; `true` means it was consumed
    fn handle_message(&mut self, message: &WindowMessage) -> bool;

    /// Whether the overlay currently captures the pointer
    fn wants_pointer_input(&self) -> bool;
}

/// Route one message between the overlay and the host
///
/// `overlay` is `None` until the overlay is initialized; every message then
/// goes to the host unmodified.
pub fn route_message(
    host: &dyn WindowHost,
    overlay: Option<&mut dyn OverlayInput>,
    message: &WindowMessage,
) -> isize {
    let Some(overlay) = overlay else {
        return host.call_original(message);
    };

    if message.msg == WM_SETCURSOR && !overlay.is_visible() {
        // Keep the cursor the host picked; the overlay's handler moves it
        let result = host.call_original(message);
        let cursor = host.cursor();
        let consumed = overlay.handle_message(message);
        host.set_cursor(cursor);
        return if consumed { 1 } else { result };
    }

    if overlay.handle_message(message) {
        return 1;
    }

    if overlay.wants_pointer_input() {
        return host.default_proc(message);
    }

    host.call_original(message)
}

/// [`route_message`] that never unwinds into the host
///
/// A panic while routing hands the message to the host's procedure, unless
/// the host or default procedure already saw it. The result is 0 then.
pub fn route_message_guarded(
    host: &dyn WindowHost,
    overlay: Option<&mut dyn OverlayInput>,
    message: &WindowMessage,
) -> isize {
    let tracked = Forwarding {
        host,
        forwarded: Cell::new(false),
    };
    match catch_unwind(AssertUnwindSafe(|| route_message(&tracked, overlay, message))) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Panic while routing window message {:#x}", message.msg);
            if tracked.forwarded.get() {
                0
            } else {
                host.call_original(message)
            }
        }
    }
}

/// Records whether a message left for the host side
struct Forwarding<'a> {
    host: &'a dyn WindowHost,
    forwarded: Cell<bool>,
}

impl WindowHost for Forwarding<'_> {
    fn call_original(&self, message: &WindowMessage) -> isize {
        self.forwarded.set(true);
        self.host.call_original(message)
    }

    fn default_proc(&self, message: &WindowMessage) -> isize {
        self.forwarded.set(true);
        self.host.default_proc(message)
    }

    fn cursor(&self) -> usize {
        self.host.cursor()
    }

    fn set_cursor(&self, cursor: usize) {
        self.host.set_cursor(cursor);
    }
}

/// Snapshot of the subclassed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHookState {
    pub hwnd: usize,
    pub original_proc: usize,
    pub installed: bool,
}

/// Subclass state of the host's main window
///
/// Fields are atomics so the replacement procedure can read them while the
/// creating thread is still inside [`WindowHook::observe_created`].
#[derive(Debug)]
pub struct WindowHook {
    class_name: String,
    claimed: AtomicBool,
    installed: AtomicBool,
    hwnd: AtomicUsize,
    original_proc: AtomicUsize,
}

impl WindowHook {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            claimed: AtomicBool::new(false),
            installed: AtomicBool::new(false),
            hwnd: AtomicUsize::new(0),
            original_proc: AtomicUsize::new(0),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Inspect a newly created window and subclass it if it is the host's
    ///
    /// `class_of` returns the window's class name. `install` replaces the
    /// message procedure and returns the previous one. Only the first
    /// matching window is subclassed. Returns whether this call did so.
    pub fn observe_created(
        &self,
        hwnd: usize,
        class_of: impl FnOnce(usize) -> Option<String>,
        install: impl FnOnce(usize) -> Option<usize>,
    ) -> bool {
        if hwnd == 0 || self.claimed.load(Ordering::Acquire) {
            return false;
        }
        match class_of(hwnd) {
            Some(class) if class == self.class_name => {}
            _ => return false,
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.hwnd.store(hwnd, Ordering::Release);
        match install(hwnd) {
            Some(original) => {
                self.original_proc.store(original, Ordering::Release);
                self.installed.store(true, Ordering::Release);
                tracing::info!("Subclassed {} window {:#x}", self.class_name, hwnd);
                true
            }
            None => {
                tracing::warn!("Failed to subclass {} window {:#x}", self.class_name, hwnd);
                self.hwnd.store(0, Ordering::Release);
                self.claimed.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Put the original message procedure back
    ///
    /// `uninstall` receives the window and the original procedure. Safe to
    /// call any number of times; only an installed subclass is removed.
    pub fn restore(&self, uninstall: impl FnOnce(usize, usize) -> bool) -> bool {
        if !self.installed.swap(false, Ordering::AcqRel) {
            return false;
        }
        let hwnd = self.hwnd.load(Ordering::Acquire);
        let original = self.original_proc.load(Ordering::Acquire);
        let restored = uninstall(hwnd, original);
        if restored {
            tracing::info!("Restored message procedure of window {:#x}", hwnd);
        } else {
            tracing::warn!("Failed to restore message procedure of window {:#x}", hwnd);
        }
        restored
    }

    /// Host window, once observed
    pub fn hwnd(&self) -> Option<usize> {
        match self.hwnd.load(Ordering::Acquire) {
            0 => None,
            hwnd => Some(hwnd),
        }
    }

    /// Host's own message procedure, once subclassed
    pub fn original_proc(&self) -> Option<usize> {
        match self.original_proc.load(Ordering::Acquire) {
            0 => None,
            proc => Some(proc),
        }
    }

    pub fn state(&self) -> Option<WindowHookState> {
        let hwnd = self.hwnd()?;
        Some(WindowHookState {
            hwnd,
            original_proc: self.original_proc.load(Ordering::Acquire),
            installed: self.installed.load(Ordering::Acquire),
        })
    }
}
