//! Replacement functions for every hooked entry point
//!
//! Each replacement reaches the code it replaced through a [`HookSlot`]
//! static and hands the decision to the core engine.
//!
//! [`HookSlot`]: modhost_core::HookSlot

pub mod d3d11;
pub mod d3d9;
pub mod files;
pub mod window;

use modhost_core::config::WindowConfig;
use modhost_core::hooks;
use modhost_engine::loader::resolve_symbol;
use modhost_engine::{Backend, BackendChoice, SystemModules};
use modhost_sdk::names::{D3D11_CREATE_DEVICE, D3D11_MODULE, D3D9_MODULE, DIRECT3D_CREATE9_EX};

use crate::error::PluginError;

/// Hook window creation and the device factory of the detected backend
///
/// Both hooks go in one transaction. Nothing is hooked without a backend.
pub fn install_render_hooks(
    config: &WindowConfig,
    choice: BackendChoice,
) -> Result<(), PluginError> {
    let factory = match (choice.backend, choice.module) {
        (Backend::D3D11, Some(module)) => Some((
            Backend::D3D11,
            resolve_symbol(&SystemModules, module, D3D11_MODULE, D3D11_CREATE_DEVICE)?,
        )),
        (Backend::D3D9, Some(module)) => Some((
            Backend::D3D9,
            resolve_symbol(&SystemModules, module, D3D9_MODULE, DIRECT3D_CREATE9_EX)?,
        )),
        _ => None,
    };
    let Some((backend, factory)) = factory else {
        tracing::warn!("No supported graphics backend, overlay disabled");
        return Ok(());
    };

    let create_window = window::target()?;
    window::init(config);

    let mut ctx = hooks();
    let result = ctx.transaction(|ctx| unsafe {
        window::attach(ctx, create_window)?;
        match backend {
            Backend::D3D11 => d3d11::attach_factory(ctx, factory),
            _ => d3d9::attach_factory(ctx, factory),
        }
    });
    if result.is_err() {
        window::settle(&ctx);
        d3d11::settle(&ctx);
        d3d9::settle(&ctx);
    }
    Ok(result?)
}

/// Release captured graphics objects and the overlay
pub fn release_render() {
    d3d11::release();
    d3d9::release();
}
