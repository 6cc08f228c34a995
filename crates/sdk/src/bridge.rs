//! Extension bridge entry point signatures
//!
//! The external runtime exposes seven entry points. Each one is resolved at
//! most once and may be missing; callers treat a missing entry as inert.

use std::ffi::c_void;

/// Starts the external subsystem. Doubles as the resource generator: a
/// `false` return means the substituted resource could not be produced.
pub type EntryPointFn = unsafe extern "system" fn() -> bool;

/// Invokes a managed method.
///
/// # Arguments
/// * `metadata` - Length-prefixed call description (type, method, return type, arg count)
/// * `arg_data` - Length-prefixed argument buffer
/// * `result` - Receives the result frame handle, or null for void methods
pub type CallFn =
    unsafe extern "system" fn(metadata: *const c_void, arg_data: *const c_void, result: *mut *mut c_void);

/// Releases a result frame previously produced by [`CallFn`].
pub type DeleteResultFn = unsafe extern "system" fn(result: *mut c_void);

/// Returns the total length of a result frame, header included.
pub type GetResultSizeFn = unsafe extern "system" fn(result: *const c_void) -> u32;

/// Copies a whole result frame into a caller buffer.
pub type CopyResultFn = unsafe extern "system" fn(dest: *mut u8, result: *const c_void);

/// Builds one frame of overlay content. Runs inline on the render thread.
pub type DrawFn = unsafe extern "system" fn();

/// Reports whether the overlay is currently shown to the user.
pub type IsOverlayVisibleFn = unsafe extern "system" fn() -> bool;

/// Size of the length prefix at the start of every result frame
pub const RESULT_HEADER_LEN: usize = 4;
