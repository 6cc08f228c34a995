//! Typed call-through holders for hook replacement functions
//!
//! A replacement body reaches the code it replaced through its slot:
//!
//! ```ignore
//! static PRESENT: HookSlot<PresentFn> = HookSlot::new("IDXGISwapChain::Present");
//!
//! unsafe extern "system" fn present_hook(this: *mut c_void, sync: u32, flags: u32) -> HRESULT {
//!     match PRESENT.original() {
//!         Some(original) => original(this, sync, flags),
//!         None => E_FAIL,
//!     }
//! }
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::error::HookError;
use super::patcher::CodePatcher;
use super::transaction::{HookContext, HookKey};

/// Typed wrapper around one hook record
///
/// `F` must be a function pointer type. The call-through address is kept
/// after the hook is removed: the trampoline it points into is never freed
/// and still behaves like the original function.
pub struct HookSlot<F> {
    name: &'static str,
    key: Mutex<Option<HookKey>>,
    original: AtomicUsize,
    _marker: PhantomData<F>,
}

impl<F: Copy> HookSlot<F> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            key: Mutex::new(None),
            original: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Call-through to the code this hook replaced
    ///
    /// Returns None if the hook was never attached
    pub fn original(&self) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        match self.original.load(Ordering::Acquire) {
            0 => None,
            // SAFETY: the address was produced for this signature by attach
            addr => Some(unsafe { std::mem::transmute_copy::<usize, F>(&addr) }),
        }
    }

    /// Queue the hook in the open batch of `ctx`
    ///
    /// # Safety
    /// `target` must be the entry of a live function whose signature and
    /// calling convention match `F`, and `replacement` must be of type `F`.
    pub unsafe fn attach<P: CodePatcher>(
        &self,
        ctx: &mut HookContext<P>,
        target: usize,
        replacement: F,
    ) -> Result<(), HookError> {
        let replacement = std::mem::transmute_copy::<F, usize>(&replacement);
        let (key, original) = ctx.attach(self.name, target, replacement)?;
        self.original.store(original, Ordering::Release);
        *self.key.lock() = Some(key);
        Ok(())
    }

    /// Queue removal of the hook in the open batch of `ctx`
    pub fn detach<P: CodePatcher>(&self, ctx: &mut HookContext<P>) -> Result<(), HookError> {
        if let Some(key) = self.key.lock().take() {
            ctx.detach(key)?;
        }
        Ok(())
    }

    /// Forget an attach whose batch was rolled back
    ///
    /// [`attach`](Self::attach) publishes the call-through before commit, so
    /// the replacement can use it as soon as the patch is written. Call this
    /// after a failed transaction; a slot whose record is still owned by
    /// `ctx` is left alone. Returns whether the slot was cleared.
    pub fn settle<P: CodePatcher>(&self, ctx: &HookContext<P>) -> bool {
        let mut key = self.key.lock();
        match *key {
            Some(k) if ctx.record(k).is_none() => {
                *key = None;
                self.original.store(0, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Check if the hook is currently written
    pub fn is_installed<P: CodePatcher>(&self, ctx: &HookContext<P>) -> bool {
        self.key
            .lock()
            .map(|key| ctx.is_installed(key))
            .unwrap_or(false)
    }
}
