//! Suspending the other threads of the process around code writes
//!
//! Everything that needs the heap happens before the first thread is
//! suspended: another thread may be parked inside the allocator.

use super::error::HookError;
#[cfg(windows)]
use super::patcher::PreparedPatch;

/// Threads suspended by [`freeze_threads`]
#[cfg(windows)]
pub struct FrozenThreads {
    threads: Vec<windows::Win32::Foundation::HANDLE>,
}

#[cfg(windows)]
pub fn freeze_threads() -> Result<FrozenThreads, HookError> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
    };
    use windows::Win32::System::Threading::{
        GetCurrentProcessId, GetCurrentThreadId, OpenThread, SuspendThread, THREAD_GET_CONTEXT,
        THREAD_SET_CONTEXT, THREAD_SUSPEND_RESUME,
    };

    // SAFETY: plain Win32 calls on handles owned by this function
    unsafe {
        let pid = GetCurrentProcessId();
        let current = GetCurrentThreadId();

        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)
            .map_err(|e| HookError::ThreadSuspend(e.to_string()))?;

        let mut ids = Vec::with_capacity(64);
        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            ..Default::default()
        };
        if Thread32First(snapshot, &mut entry).is_ok() {
            loop {
                if entry.th32OwnerProcessID == pid && entry.th32ThreadID != current {
                    ids.push(entry.th32ThreadID);
                }
                if Thread32Next(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);

        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            let access = THREAD_SUSPEND_RESUME | THREAD_GET_CONTEXT | THREAD_SET_CONTEXT;
            let Ok(handle) = OpenThread(access, false, id) else {
                continue;
            };
            if SuspendThread(handle) == u32::MAX {
                let _ = CloseHandle(handle);
            } else {
                threads.push(handle);
            }
        }

        Ok(FrozenThreads { threads })
    }
}

/// Move each thread's instruction pointer out of rewritten code, then resume
#[cfg(windows)]
pub fn thaw_threads(frozen: FrozenThreads, applied: &[(&PreparedPatch, bool)]) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::ResumeThread;

    for handle in frozen.threads {
        if !applied.is_empty() {
            relocate_thread(handle, applied);
        }
        // SAFETY: handle was opened and suspended by freeze_threads
        unsafe {
            ResumeThread(handle);
            let _ = CloseHandle(handle);
        }
    }
}

#[cfg(windows)]
fn relocate_thread(handle: windows::Win32::Foundation::HANDLE, applied: &[(&PreparedPatch, bool)]) {
    use windows::Win32::System::Diagnostics::Debug::{GetThreadContext, SetThreadContext, CONTEXT};

    #[cfg(target_arch = "x86_64")]
    use windows::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_AMD64 as CONTEXT_CONTROL;
    #[cfg(target_arch = "x86")]
    use windows::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_X86 as CONTEXT_CONTROL;

    let mut context = CONTEXT {
        ContextFlags: CONTEXT_CONTROL,
        ..Default::default()
    };
    // SAFETY: the thread is suspended and context is properly aligned
    if unsafe { GetThreadContext(handle, &mut context) }.is_err() {
        return;
    }

    #[cfg(target_arch = "x86_64")]
    let ip = context.Rip as usize;
    #[cfg(target_arch = "x86")]
    let ip = context.Eip as usize;

    for &(patch, install) in applied {
        if let Some(new_ip) = patch.relocate_ip(ip, install) {
            #[cfg(target_arch = "x86_64")]
            {
                context.Rip = new_ip as u64;
            }
            #[cfg(target_arch = "x86")]
            {
                context.Eip = new_ip as u32;
            }
            // SAFETY: the thread is suspended
            let _ = unsafe { SetThreadContext(handle, &context) };
            break;
        }
    }
}

/// Thread suspension is only implemented for Windows
#[cfg(not(windows))]
pub struct FrozenThreads;

#[cfg(not(windows))]
pub fn freeze_threads() -> Result<FrozenThreads, HookError> {
    Ok(FrozenThreads)
}

#[cfg(not(windows))]
pub fn thaw_threads(_frozen: FrozenThreads, _applied: &[(&super::patcher::PreparedPatch, bool)]) {}
