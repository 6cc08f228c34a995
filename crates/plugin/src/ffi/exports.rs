//! C-compatible exports called from GameMaker scripts
//!
//! GameMaker's extension interface only passes doubles and pointers, so
//! every export returns `f64`. Result handles are pointer cells: the export
//! reads the frame pointer out of the cell, and clears it once deleted.

use std::ffi::c_void;
use std::panic::{catch_unwind, UnwindSafe};

use tracing::error;

use crate::bridge_loader::bridge;

const OK: f64 = 1.0;
const FAILED: f64 = 0.0;

fn guarded(name: &str, f: impl FnOnce() -> f64 + UnwindSafe) -> f64 {
    catch_unwind(f).unwrap_or_else(|_| {
        error!("Panic in {}", name);
        FAILED
    })
}

/// Invoke a managed method, storing the result frame in `result_data`
///
/// When `result_data` is null the frame is released immediately.
///
/// # Safety
/// `metadata` and `arg_data` must be frames the runtime can read;
/// `result_data` must be null or writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn CallCSharp(
    metadata: *const c_void,
    arg_data: *const c_void,
    result_data: *mut *mut c_void,
) -> f64 {
    guarded("CallCSharp", || {
        let bridge = bridge();
        if !bridge.is_resolved() {
            return FAILED;
        }
        let result = bridge.call(metadata, arg_data);
        match result_data.as_mut() {
            Some(cell) => *cell = result,
            None => bridge.delete_result(result),
        }
        OK
    })
}

/// Release the frame held in `result_data` and clear the cell
///
/// # Safety
/// `result_data` must be null or hold null or a live frame.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn DeleteResult(result_data: *mut *mut c_void) -> f64 {
    guarded("DeleteResult", || {
        let Some(cell) = result_data.as_mut() else {
            return FAILED;
        };
        bridge().delete_result(*cell);
        *cell = std::ptr::null_mut();
        OK
    })
}

/// Total length of the frame held in `result_data`, header included
///
/// # Safety
/// `result_data` must be null or hold null or a live frame.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn GetResultSize(result_data: *mut *mut c_void) -> f64 {
    guarded("GetResultSize", || match result_data.as_ref() {
        Some(&frame) => f64::from(bridge().result_size(frame)),
        None => 0.0,
    })
}

/// Copy the whole frame held in `result_data` into `buffer`
///
/// # Safety
/// `buffer` must have room for [`GetResultSize`] bytes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn CopyResultToBuffer(buffer: *mut c_void, result_data: *mut *mut c_void) -> f64 {
    guarded("CopyResultToBuffer", || {
        let Some(&frame) = result_data.as_ref() else {
            return FAILED;
        };
        if frame.is_null() || buffer.is_null() {
            return FAILED;
        }
        bridge().copy_result(buffer as *mut u8, frame);
        OK
    })
}
