//! Extension runtime bridge
//!
//! Seven entry points exported by the bridge module. Each slot is resolved
//! at most once and every call site treats a missing slot as inert: void
//! operations do nothing, queries return a default.

pub mod frame;

use std::ffi::c_void;
use std::sync::OnceLock;

use modhost_sdk::bridge::{
    CallFn, CopyResultFn, DeleteResultFn, DrawFn, EntryPointFn, GetResultSizeFn,
    IsOverlayVisibleFn,
};
use modhost_sdk::names::{
    BRIDGE_CALL, BRIDGE_COPY_RESULT, BRIDGE_DELETE_RESULT, BRIDGE_DRAW, BRIDGE_ENTRY_POINT,
    BRIDGE_GET_RESULT_SIZE, BRIDGE_IS_OVERLAY_VISIBLE,
};

pub use frame::FrameError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Missing bridge entry points: {}", .0.join(", "))]
    Unresolved(Vec<&'static str>),

    #[error("Bridge entry points are already resolved")]
    AlreadyResolved,
}

/// Why an invocation produced no payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The call entry point is not resolved
    Unresolved,
    /// The runtime returned a frame we could not decode
    MalformedFrame(FrameError),
}

/// Outcome of [`ManagedBridge::invoke`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResult {
    pub success: bool,
    pub payload: Vec<u8>,
    pub error: Option<InvokeError>,
}

impl BridgeResult {
    fn ok(payload: Vec<u8>) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    fn failed(error: InvokeError) -> Self {
        Self {
            success: false,
            payload: Vec::new(),
            error: Some(error),
        }
    }
}

/// Entry points into the extension runtime
#[derive(Default)]
pub struct ManagedBridge {
    entry_point: OnceLock<EntryPointFn>,
    call: OnceLock<CallFn>,
    delete_result: OnceLock<DeleteResultFn>,
    result_size: OnceLock<GetResultSizeFn>,
    copy_result: OnceLock<CopyResultFn>,
    draw: OnceLock<DrawFn>,
    is_overlay_visible: OnceLock<IsOverlayVisibleFn>,
    started: OnceLock<bool>,
}

struct Resolved {
    entry_point: Option<usize>,
    call: Option<usize>,
    delete_result: Option<usize>,
    result_size: Option<usize>,
    copy_result: Option<usize>,
    draw: Option<usize>,
    is_overlay_visible: Option<usize>,
}

impl ManagedBridge {
    pub const fn new() -> Self {
        Self {
            entry_point: OnceLock::new(),
            call: OnceLock::new(),
            delete_result: OnceLock::new(),
            result_size: OnceLock::new(),
            copy_result: OnceLock::new(),
            draw: OnceLock::new(),
            is_overlay_visible: OnceLock::new(),
            started: OnceLock::new(),
        }
    }

    /// Resolve every slot through `resolver`, which maps a NUL-terminated
    /// export name to its address
    ///
    /// Fails without filling any slot if a required entry point is missing.
    /// The result-size and copy-result entry points are optional; frames are
    /// decoded natively without them.
    ///
    /// # Safety
    /// Every address returned by `resolver` must be a function with the
    /// signature declared in [`modhost_sdk::bridge`] for that export.
    pub unsafe fn resolve(
        &self,
        mut resolver: impl FnMut(&[u8]) -> Option<usize>,
    ) -> Result<(), BridgeError> {
        if self.is_resolved() {
            return Err(BridgeError::AlreadyResolved);
        }

        let mut lookup = |symbol: &[u8]| resolver(symbol).filter(|&address| address != 0);
        let found = Resolved {
            entry_point: lookup(BRIDGE_ENTRY_POINT),
            call: lookup(BRIDGE_CALL),
            delete_result: lookup(BRIDGE_DELETE_RESULT),
            result_size: lookup(BRIDGE_GET_RESULT_SIZE),
            copy_result: lookup(BRIDGE_COPY_RESULT),
            draw: lookup(BRIDGE_DRAW),
            is_overlay_visible: lookup(BRIDGE_IS_OVERLAY_VISIBLE),
        };

        let missing: Vec<&'static str> = [
            ("EntryPoint", found.entry_point),
            ("Call", found.call),
            ("DeleteResult", found.delete_result),
            ("Draw", found.draw),
            ("IsOverlayVisible", found.is_overlay_visible),
        ]
        .into_iter()
        .filter_map(|(name, address)| address.is_none().then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(BridgeError::Unresolved(missing));
        }

        if found.result_size.is_none() || found.copy_result.is_none() {
            tracing::debug!("Bridge exports no frame accessors, decoding frames natively");
        }

        fill(&self.entry_point, found.entry_point);
        fill(&self.call, found.call);
        fill(&self.delete_result, found.delete_result);
        fill(&self.result_size, found.result_size);
        fill(&self.copy_result, found.copy_result);
        fill(&self.draw, found.draw);
        fill(&self.is_overlay_visible, found.is_overlay_visible);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.entry_point.get().is_some()
    }

    /// Start the external subsystem
    ///
    /// Runs the entry point at most once; later calls return the first
    /// result. Returns `false` without latching while unresolved.
    pub fn entry_point(&self) -> bool {
        let Some(&entry) = self.entry_point.get() else {
            return false;
        };
        *self.started.get_or_init(|| {
            tracing::info!("Starting extension runtime");
            let started = unsafe { entry() };
            if !started {
                tracing::error!("Extension runtime entry point reported failure");
            }
            started
        })
    }

    /// Whether the entry point has run, and its result
    pub fn started(&self) -> Option<bool> {
        self.started.get().copied()
    }

    /// Invoke a managed method; returns the result frame or null
    ///
    /// # Safety
    /// `metadata` and `arg_data` must be frames the runtime can read.
    pub unsafe fn call(&self, metadata: *const c_void, arg_data: *const c_void) -> *mut c_void {
        let mut result = std::ptr::null_mut();
        if let Some(&call) = self.call.get() {
            call(metadata, arg_data, &mut result);
        }
        result
    }

    /// # Safety
    /// `result` must be null or a frame returned by [`call`](Self::call)
    /// that was not yet deleted.
    pub unsafe fn delete_result(&self, result: *mut c_void) {
        if result.is_null() {
            return;
        }
        if let Some(&delete) = self.delete_result.get() {
            delete(result);
        }
    }

    /// Total length of a result frame, header included; 0 for null
    ///
    /// # Safety
    /// `result` must be null or a live result frame.
    pub unsafe fn result_size(&self, result: *const c_void) -> u32 {
        if result.is_null() {
            return 0;
        }
        match self.result_size.get() {
            Some(&size) => size(result),
            None => frame::read_frame_len(result as *const u8),
        }
    }

    /// Copy a whole result frame to `dest`
    ///
    /// # Safety
    /// `result` must be null or a live result frame, and `dest` must have
    /// room for [`result_size`](Self::result_size) bytes.
    pub unsafe fn copy_result(&self, dest: *mut u8, result: *const c_void) {
        if dest.is_null() || result.is_null() {
            return;
        }
        match self.copy_result.get() {
            Some(&copy) => copy(dest, result),
            None => {
                let len = frame::read_frame_len(result as *const u8) as usize;
                std::ptr::copy_nonoverlapping(result as *const u8, dest, len);
            }
        }
    }

    /// Build one frame of overlay content
    pub fn draw(&self) {
        if let Some(&draw) = self.draw.get() {
            unsafe { draw() }
        }
    }

    pub fn is_overlay_visible(&self) -> bool {
        self.is_overlay_visible
            .get()
            .map(|&visible| unsafe { visible() })
            .unwrap_or(false)
    }

    /// Invoke a managed method and take ownership of its payload
    ///
    /// The foreign frame is released before returning. A method without a
    /// result succeeds with an empty payload.
    ///
    /// # Safety
    /// Same as [`call`](Self::call).
    pub unsafe fn invoke(&self, metadata: *const c_void, arg_data: *const c_void) -> BridgeResult {
        if self.call.get().is_none() {
            return BridgeResult::failed(InvokeError::Unresolved);
        }

        let result = self.call(metadata, arg_data);
        if result.is_null() {
            return BridgeResult::ok(Vec::new());
        }

        let len = self.result_size(result) as usize;
        let outcome = if len < frame::HEADER_LEN {
            Err(FrameError::Truncated(len))
        } else {
            let mut bytes = vec![0u8; len];
            self.copy_result(bytes.as_mut_ptr(), result);
            frame::payload(&bytes).map(<[u8]>::to_vec)
        };
        self.delete_result(result);

        match outcome {
            Ok(payload) => BridgeResult::ok(payload),
            Err(e) => {
                tracing::warn!("Discarding bridge result: {}", e);
                BridgeResult::failed(InvokeError::MalformedFrame(e))
            }
        }
    }
}

/// Store a resolved address in its slot
///
/// # Safety
/// `address` must be a function of type `F`.
unsafe fn fill<F: Copy>(slot: &OnceLock<F>, address: Option<usize>) {
    if let Some(address) = address {
        let f = std::mem::transmute_copy::<usize, F>(&address);
        let _ = slot.set(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "system" fn entry_ok() -> bool {
        ENTRY_CALLS.fetch_add(1, Ordering::SeqCst);
        true
    }
    static ENTRY_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn entry_fails() -> bool {
        false
    }

    unsafe extern "system" fn call_echo(
        _metadata: *const c_void,
        arg_data: *const c_void,
        result: *mut *mut c_void,
    ) {
        if arg_data.is_null() {
            return;
        }
        let len = frame::read_frame_len(arg_data as *const u8) as usize;
        let bytes = std::slice::from_raw_parts(arg_data as *const u8, len).to_vec();
        *result = Box::into_raw(bytes.into_boxed_slice()) as *mut c_void;
    }

    unsafe extern "system" fn call_garbage(
        _metadata: *const c_void,
        _arg_data: *const c_void,
        result: *mut *mut c_void,
    ) {
        let bytes: Box<[u8]> = Box::new([2, 0, 0, 0]);
        *result = Box::into_raw(bytes) as *mut c_void;
    }

    unsafe extern "system" fn delete_boxed(result: *mut c_void) {
        let len = frame::read_frame_len(result as *const u8).max(4) as usize;
        let slice = std::ptr::slice_from_raw_parts_mut(result as *mut u8, len);
        drop(Box::from_raw(slice));
        DELETED.fetch_add(1, Ordering::SeqCst);
    }
    static DELETED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn draw_noop() {}

    unsafe extern "system" fn visible_yes() -> bool {
        true
    }

    fn exports(entry: EntryPointFn, call: CallFn) -> HashMap<&'static [u8], usize> {
        HashMap::from([
            (BRIDGE_ENTRY_POINT, entry as usize),
            (BRIDGE_CALL, call as usize),
            (BRIDGE_DELETE_RESULT, delete_boxed as usize),
            (BRIDGE_DRAW, draw_noop as usize),
            (BRIDGE_IS_OVERLAY_VISIBLE, visible_yes as usize),
        ])
    }

    fn resolved(entry: EntryPointFn, call: CallFn) -> ManagedBridge {
        let table = exports(entry, call);
        let bridge = ManagedBridge::new();
        unsafe { bridge.resolve(|symbol| table.get(symbol).copied()) }.unwrap();
        bridge
    }

    #[test]
    fn test_unresolved_bridge_is_inert() {
        let bridge = ManagedBridge::new();
        assert!(!bridge.is_resolved());
        assert!(!bridge.entry_point());
        assert_eq!(bridge.started(), None);
        assert!(!bridge.is_overlay_visible());
        bridge.draw();

        unsafe {
            assert!(bridge.call(std::ptr::null(), std::ptr::null()).is_null());
            bridge.delete_result(std::ptr::null_mut());
            assert_eq!(bridge.result_size(std::ptr::null()), 0);
            let result = bridge.invoke(std::ptr::null(), std::ptr::null());
            assert_eq!(result.error, Some(InvokeError::Unresolved));
            assert!(!result.success);
        }
    }

    #[test]
    fn test_missing_required_fills_nothing() {
        let mut table = exports(entry_fails, call_echo);
        table.remove(BRIDGE_DRAW);
        table.remove(BRIDGE_CALL);

        let bridge = ManagedBridge::new();
        let err = unsafe { bridge.resolve(|symbol| table.get(symbol).copied()) }.unwrap_err();
        assert_eq!(err, BridgeError::Unresolved(vec!["Call", "Draw"]));
        assert!(!bridge.is_resolved());
        assert!(!bridge.is_overlay_visible());
    }

    #[test]
    fn test_null_address_counts_as_missing() {
        let bridge = ManagedBridge::new();
        let err = unsafe { bridge.resolve(|_| Some(0)) }.unwrap_err();
        assert!(matches!(err, BridgeError::Unresolved(names) if names.len() == 5));
    }

    #[test]
    fn test_resolve_twice_rejected() {
        let bridge = resolved(entry_fails, call_echo);
        let table = exports(entry_fails, call_echo);
        let again = unsafe { bridge.resolve(|symbol| table.get(symbol).copied()) };
        assert_eq!(again, Err(BridgeError::AlreadyResolved));
    }

    #[test]
    fn test_entry_point_runs_once() {
        let bridge = resolved(entry_ok, call_echo);
        assert!(bridge.entry_point());
        assert!(bridge.entry_point());
        assert_eq!(ENTRY_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.started(), Some(true));
        assert!(bridge.is_overlay_visible());
    }

    #[test]
    fn test_entry_point_failure_latches() {
        let bridge = resolved(entry_fails, call_echo);
        assert!(!bridge.entry_point());
        assert_eq!(bridge.started(), Some(false));
    }

    #[test]
    fn test_invoke_decodes_native_frames() {
        let bridge = resolved(entry_fails, call_echo);
        let args = frame::encode(b"ping").unwrap();
        let before = DELETED.load(Ordering::SeqCst);

        let result = unsafe { bridge.invoke(std::ptr::null(), args.as_ptr() as *const c_void) };
        assert!(result.success);
        assert_eq!(result.payload, b"ping");
        assert!(DELETED.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn test_invoke_void_method() {
        let bridge = resolved(entry_fails, call_echo);
        let result = unsafe { bridge.invoke(std::ptr::null(), std::ptr::null()) };
        assert_eq!(result, BridgeResult::ok(Vec::new()));
    }

    #[test]
    fn test_invoke_rejects_short_frame() {
        let bridge = resolved(entry_fails, call_garbage);
        let result = unsafe { bridge.invoke(std::ptr::null(), std::ptr::null()) };
        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(InvokeError::MalformedFrame(FrameError::Truncated(2)))
        );
    }

    #[test]
    fn test_copy_result_copies_whole_frame() {
        let bridge = resolved(entry_fails, call_echo);
        let frame = frame::encode(&[9, 8, 7]).unwrap();
        unsafe {
            let size = bridge.result_size(frame.as_ptr() as *const c_void);
            assert_eq!(size, 7);
            let mut dest = vec![0u8; size as usize];
            bridge.copy_result(dest.as_mut_ptr(), frame.as_ptr() as *const c_void);
            assert_eq!(dest, frame);
        }
    }
}
