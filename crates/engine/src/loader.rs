//! Host module discovery via resident-module lookup and dynamic loading

use std::ffi::CStr;

use crate::error::EngineError;

/// Opaque handle to a module mapped into the host process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub usize);

impl ModuleHandle {
    /// Base address of the module image
    pub fn base(self) -> usize {
        self.0
    }
}

/// Module lookup operations against the host process
///
/// The system loader implements this on Windows; tests substitute a table.
pub trait ModuleApi {
    /// Return the module if it is already mapped, without loading it
    fn find_resident(&self, name: &str) -> Option<ModuleHandle>;

    /// Load (or add a reference to) a module
    fn load(&self, name: &str) -> Option<ModuleHandle>;

    /// Resolve an exported symbol to its address
    fn symbol(&self, module: ModuleHandle, name: &CStr) -> Option<usize>;
}

/// Resolve a null-terminated symbol, reporting which module lacked it
///
/// # Arguments
/// * `api` - Module lookup implementation
/// * `module` - Module handle to search
/// * `module_name` - Human-readable name for error messages (e.g., "d3d11.dll")
/// * `symbol` - Null-terminated symbol name (e.g., b"D3D11CreateDevice\0")
pub fn resolve_symbol(
    api: &dyn ModuleApi,
    module: ModuleHandle,
    module_name: &str,
    symbol: &[u8],
) -> Result<usize, EngineError> {
    let name = CStr::from_bytes_with_nul(symbol).map_err(|_| {
        EngineError::InvalidSymbolName(String::from_utf8_lossy(symbol).into_owned())
    })?;

    api.symbol(module, name)
        .ok_or_else(|| EngineError::SymbolNotFound {
            module: module_name.to_string(),
            symbol: name.to_string_lossy().into_owned(),
        })
}

/// Load a module by name or path, failing with a descriptive error
pub fn require_module(api: &dyn ModuleApi, name: &str) -> Result<ModuleHandle, EngineError> {
    api.find_resident(name)
        .or_else(|| api.load(name))
        .ok_or_else(|| EngineError::ModuleNotFound(name.to_string()))
}

/// The Windows loader
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemModules;

#[cfg(windows)]
impl ModuleApi for SystemModules {
    fn find_resident(&self, name: &str) -> Option<ModuleHandle> {
        use windows::core::HSTRING;
        use windows::Win32::System::LibraryLoader::GetModuleHandleW;

        let wide = HSTRING::from(name);
        // SAFETY: wide is a valid null-terminated UTF-16 string
        let module = unsafe { GetModuleHandleW(&wide) }.ok()?;
        (!module.0.is_null()).then(|| ModuleHandle(module.0 as usize))
    }

    fn load(&self, name: &str) -> Option<ModuleHandle> {
        use windows::core::HSTRING;
        use windows::Win32::System::LibraryLoader::LoadLibraryW;

        let wide = HSTRING::from(name);
        // SAFETY: wide is a valid null-terminated UTF-16 string
        match unsafe { LoadLibraryW(&wide) } {
            Ok(module) if !module.0.is_null() => Some(ModuleHandle(module.0 as usize)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("LoadLibraryW({}) failed: {}", name, e);
                None
            }
        }
    }

    fn symbol(&self, module: ModuleHandle, name: &CStr) -> Option<usize> {
        use windows::core::PCSTR;
        use windows::Win32::Foundation::HMODULE;
        use windows::Win32::System::LibraryLoader::GetProcAddress;

        let module = HMODULE(module.0 as *mut std::ffi::c_void);
        // SAFETY: module came from the loader, name is null-terminated
        unsafe { GetProcAddress(module, PCSTR(name.as_ptr().cast())) }.map(|f| f as usize)
    }
}
