//! Process attach and detach

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use windows::core::HSTRING;
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

use modhost_core::config::{logs_dir, CoreConfig};
use modhost_engine::{detect_backend, init_host, HostGlobals, ModuleHandle, SystemModules};

use crate::error::PluginError;
use crate::{bridge_loader, detours, tracing_helper};

const LOG_FILE: &str = "modhost.log";

/// Attach to the host process
///
/// Never fails: every problem is logged and leaves the host unmodified.
pub fn attach(self_module: usize) {
    let loaded = CoreConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    if let Ok(dir) = logs_dir() {
        tracing_helper::init_tracing(&dir, LOG_FILE, config.debug, config.console);
    }
    info!("modhost {} attaching", env!("CARGO_PKG_VERSION"));
    if let Err(e) = &loaded {
        warn!("Using default config: {}", e);
    }

    if let Err(e) = activate(self_module, &config) {
        error!("Activation aborted: {}", e);
        if config.dialogs {
            show_error_dialog(&format!("modhost could not start and stays inactive.\n\n{}", e));
        }
    }
}

#[tracing::instrument(skip_all)]
fn activate(self_module: usize, config: &CoreConfig) -> Result<(), PluginError> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(PathBuf::new);
    if let Err(e) = init_host(HostGlobals::new(ModuleHandle(self_module), exe_dir)) {
        warn!("Host globals: {}", e);
    }

    // No hook is installed without a working bridge
    bridge_loader::load(&SystemModules, &config.bridge)?;

    if let Err(e) = detours::files::install(&config.redirect) {
        error!("File redirection disabled: {}", e);
    }

    let choice = detect_backend(&SystemModules);
    info!("Graphics backend: {}", choice.backend);
    if let Err(e) = detours::install_render_hooks(&config.window, choice) {
        error!("Overlay disabled: {}", e);
    }

    info!("modhost active");
    Ok(())
}

/// Detach from the host process
///
/// When the whole process is exiting, graphics objects are left alone: the
/// modules that own them may already be gone.
pub fn detach(process_exiting: bool) {
    info!("modhost detaching");
    modhost_core::shutdown();
    detours::window::restore();
    if !process_exiting {
        detours::release_render();
    }
}

fn show_error_dialog(msg: &str) {
    unsafe {
        MessageBoxW(
            HWND::default(),
            &HSTRING::from(msg),
            &HSTRING::from(env!("CARGO_PKG_NAME")),
            MB_ICONERROR | MB_OK,
        )
    };
}
