//! Trampoline memory allocation
//!
//! Allocates executable memory within ±2GB of target addresses so the
//! 5-byte `jmp rel32` written at a hooked entry can reach its relay stub.
//! Blocks are never freed: a call-through stays valid for the lifetime of
//! the process, even after its hook is removed.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;

/// Page size (4KB on most systems)
const PAGE_SIZE: usize = 4096;

/// Distance between probed addresses; also the Windows allocation granularity
const PROBE_STEP: usize = 0x1_0000;

/// Trampoline allocation size (relay stub plus relocated prologue)
pub const TRAMPOLINE_SIZE: usize = 64;

/// Maximum distance for a rel32 branch, with headroom for the block itself
const MAX_RANGE: usize = 0x7FFF_0000;

/// Global trampoline allocator
static ALLOCATOR: Mutex<TrampolineAllocator> = Mutex::new(TrampolineAllocator::new());

/// Allocator for executable trampolines
struct TrampolineAllocator {
    /// Pages allocated, keyed by base address
    pages: BTreeMap<usize, PageInfo>,
}

struct PageInfo {
    base: *mut u8,
    size: usize,
    used: usize,
}

// SAFETY: The allocator is protected by a mutex and pages are only accessed through it
unsafe impl Send for PageInfo {}

fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

/// Candidate page addresses ordered by distance from `target`
fn probe_addresses(target: usize) -> impl Iterator<Item = usize> {
    let origin = target & !(PROBE_STEP - 1);
    (1..=MAX_RANGE / PROBE_STEP).flat_map(move |step| {
        let delta = step * PROBE_STEP;
        [origin.checked_sub(delta), origin.checked_add(delta)]
            .into_iter()
            .flatten()
            .filter(move |&hint| hint != 0 && distance(hint, target) < MAX_RANGE)
    })
}

impl TrampolineAllocator {
    const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Allocate a trampoline near the target address
    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        // First, try to find an existing page within range
        for (&base, page) in &mut self.pages {
            if distance(base, target) < MAX_RANGE && page.used + size <= page.size {
                // SAFETY: used + size stays within the page
                let ptr = unsafe { page.base.add(page.used) };
                page.used += size;
                return NonNull::new(ptr);
            }
        }

        // Allocate a new page near the target
        let new_page = self.alloc_page_near(target)?;
        let page = self.pages.get_mut(&(new_page as usize))?;
        page.used = size;
        NonNull::new(new_page)
    }

    fn record_page(&mut self, base: *mut u8) -> *mut u8 {
        self.pages.insert(
            base as usize,
            PageInfo {
                base,
                size: PAGE_SIZE,
                used: 0,
            },
        );
        base
    }

    #[cfg(unix)]
    fn alloc_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
        use std::num::NonZeroUsize;

        let len = NonZeroUsize::new(PAGE_SIZE)?;

        for hint in probe_addresses(target) {
            // SAFETY: anonymous private mapping, no existing memory is touched
            let result = unsafe {
                mmap_anonymous(
                    NonZeroUsize::new(hint),
                    len,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                    MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                )
            };

            if let Ok(ptr) = result {
                let base = ptr.as_ptr() as *mut u8;
                if distance(base as usize, target) < MAX_RANGE {
                    return Some(self.record_page(base));
                }
                // The kernel ignored the hint and mapped elsewhere
                // SAFETY: ptr was mapped above with this length
                unsafe {
                    let _ = munmap(ptr, PAGE_SIZE);
                }
            }
        }

        tracing::error!("Failed to allocate trampoline page near {:#x}", target);
        None
    }

    #[cfg(windows)]
    fn alloc_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use windows::Win32::System::Memory::{
            VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        };

        for hint in probe_addresses(target) {
            // SAFETY: reserving fresh memory at a free address or failing
            let result = unsafe {
                VirtualAlloc(
                    Some(hint as *const std::ffi::c_void),
                    PAGE_SIZE,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                )
            };

            if !result.is_null() {
                let base = result as *mut u8;
                if distance(base as usize, target) < MAX_RANGE {
                    return Some(self.record_page(base));
                }
                // SAFETY: result was allocated above
                unsafe {
                    let _ = VirtualFree(result, 0, MEM_RELEASE);
                }
            }
        }

        tracing::error!("Failed to allocate trampoline page near {:#x}", target);
        None
    }
}

/// Allocate a trampoline buffer near the target address
pub fn alloc_trampoline(target: usize) -> Option<NonNull<u8>> {
    ALLOCATOR.lock().alloc_near(target, TRAMPOLINE_SIZE)
}

/// Check if a rel32 branch at `from` can reach `to`
pub fn within_rel32(from: usize, to: usize) -> bool {
    if cfg!(target_pointer_width = "32") {
        // rel32 wraps around the whole 32-bit address space
        return true;
    }
    let delta = to as i64 - from as i64;
    delta >= i32::MIN as i64 && delta <= i32::MAX as i64
}
