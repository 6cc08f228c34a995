//! Global host state storage
//!
//! Host state is captured once during attach and stored here.
//! Access is thread-safe via OnceLock.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread::ThreadId;

use crate::error::EngineError;
use crate::loader::ModuleHandle;

/// Process-wide state captured at attach
#[derive(Debug)]
pub struct HostGlobals {
    /// Our own module (the injected library)
    pub self_module: ModuleHandle,

    /// Directory holding the host executable
    pub exe_dir: PathBuf,

    /// Thread that ran attach
    pub attach_thread_id: ThreadId,
}

/// Global host state storage
static HOST: OnceLock<HostGlobals> = OnceLock::new();

/// Initialize host globals
///
/// Called once during attach. Returns error if already initialized.
pub fn init_host(globals: HostGlobals) -> Result<(), EngineError> {
    HOST.set(globals).map_err(|_| EngineError::AlreadyInitialized)
}

/// Try to get host globals without panicking
pub fn try_host() -> Option<&'static HostGlobals> {
    HOST.get()
}

impl HostGlobals {
    /// Create new HostGlobals on the current thread
    pub fn new(self_module: ModuleHandle, exe_dir: impl Into<PathBuf>) -> Self {
        Self {
            self_module,
            exe_dir: exe_dir.into(),
            attach_thread_id: std::thread::current().id(),
        }
    }

    /// Directory holding the host executable
    pub fn exe_dir(&self) -> &Path {
        &self.exe_dir
    }

    /// Resolve a path relative to the host executable directory
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.exe_dir.join(relative)
        }
    }

    /// Check if current thread is the attach thread
    pub fn is_attach_thread(&self) -> bool {
        std::thread::current().id() == self.attach_thread_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_to_exe_dir() {
        let globals = HostGlobals::new(ModuleHandle(0x10), "/games/host");
        assert_eq!(
            globals.resolve("modhost/bridge.dll"),
            PathBuf::from("/games/host/modhost/bridge.dll")
        );
        assert!(globals.is_attach_thread());
    }
}
