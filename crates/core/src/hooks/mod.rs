//! Hook system
//!
//! Transactional inline hooks:
//! - [`HookContext`] owns every redirection and applies batches atomically
//! - [`InlinePatcher`] rewrites x86/x86-64 function entries, relocating the
//!   overwritten prologue into a near trampoline
//! - [`HookSlot`] gives replacement functions a typed way to call through
//!
//! The process-wide context is reached through [`hooks()`].

pub mod error;
pub mod freeze;
pub mod inline;
pub mod patcher;
pub mod slot;
pub mod trampoline;
pub mod transaction;

use std::sync::LazyLock;

use parking_lot::{Mutex, MutexGuard};

pub use error::HookError;
pub use inline::InlinePatcher;
pub use patcher::{CodePatcher, PreparedPatch};
pub use slot::HookSlot;
pub use transaction::{HookContext, HookKey, HookRecord};

/// Process-wide hook context
static HOOKS: LazyLock<Mutex<HookContext<InlinePatcher>>> =
    LazyLock::new(|| Mutex::new(HookContext::new(InlinePatcher)));

/// Lock the process-wide hook context
///
/// The lock is not reentrant; code reached from inside a commit must not
/// take it.
pub fn hooks() -> MutexGuard<'static, HookContext<InlinePatcher>> {
    HOOKS.lock()
}
