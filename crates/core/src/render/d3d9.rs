//! D3D9 render pipeline
//!
//! ```text
//! Uninitialized --factory--> FactoryHooked --device--> DeviceCreated
//! ```
//!
//! The factory's CreateDevice is hooked first; once it yields a device its
//! EndScene and Reset entries are hooked and the overlay is bound to it.
//! Presentation parameters are snapshotted at creation and on every reset.

use std::sync::Arc;

use super::dispatch::{DispatchSlot, DispatchTable, HookInstaller};
use super::error::RenderError;
use super::overlay::{drive_frame, OverlayRenderer, OverlaySlot};

/// Device-side operations the pipeline needs
pub trait Dx9Device {
    /// Presentation parameters snapshot
    type Params: Clone;

    /// Read the EndScene and Reset entries of the device
    fn dispatch(&self) -> Result<DispatchTable, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dx9State {
    Uninitialized,
    FactoryHooked,
    DeviceCreated,
}

impl Dx9State {
    fn name(self) -> &'static str {
        match self {
            Dx9State::Uninitialized => "uninitialized",
            Dx9State::FactoryHooked => "factory hooked",
            Dx9State::DeviceCreated => "device created",
        }
    }
}

pub struct Dx9Pipeline<D: Dx9Device> {
    state: Dx9State,
    device: Option<D>,
    params: Option<D::Params>,
    dispatch: DispatchTable,
    overlay: Arc<OverlaySlot>,
}

impl<D: Dx9Device> Dx9Pipeline<D> {
    pub fn new(overlay: Arc<OverlaySlot>) -> Self {
        Self {
            state: Dx9State::Uninitialized,
            device: None,
            params: None,
            dispatch: DispatchTable::default(),
            overlay,
        }
    }

    pub fn state(&self) -> Dx9State {
        self.state
    }

    pub fn params(&self) -> Option<&D::Params> {
        self.params.as_ref()
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Hook CreateDevice on the first factory
    ///
    /// Every factory shares the entry, so later factories are ignored.
    #[tracing::instrument(skip_all)]
    pub fn on_factory_created(
        &mut self,
        factory: DispatchTable,
        installer: &mut dyn HookInstaller,
    ) -> Result<(), RenderError> {
        if self.state != Dx9State::Uninitialized {
            return Ok(());
        }

        let entries = factory.require(&[DispatchSlot::CreateDevice])?;
        installer.install(&entries)?;
        self.dispatch.merge(&factory);
        self.state = Dx9State::FactoryHooked;
        tracing::info!("Direct3D 9 factory hooked");
        Ok(())
    }

    /// Handle a device returned by the real CreateDevice
    ///
    /// The first device gets EndScene and Reset hooked. Later devices only
    /// rebind the overlay and the parameters snapshot.
    #[tracing::instrument(skip_all)]
    pub fn on_device_created(
        &mut self,
        mut device: D,
        params: D::Params,
        installer: &mut dyn HookInstaller,
        make_overlay: impl FnOnce(&mut D) -> Box<dyn OverlayRenderer>,
    ) -> Result<(), RenderError> {
        match self.state {
            Dx9State::Uninitialized => {
                return Err(RenderError::InvalidState {
                    action: "accept a device",
                    state: self.state.name(),
                });
            }
            Dx9State::FactoryHooked => {
                let table = device.dispatch()?;
                let entries = table.require(&[DispatchSlot::EndScene, DispatchSlot::Reset])?;
                installer.install(&entries)?;
                self.dispatch.merge(&table);
            }
            Dx9State::DeviceCreated => {
                tracing::info!("Overlay rebound to a new D3D9 device");
            }
        }

        self.overlay.install(make_overlay(&mut device));
        self.device = Some(device);
        self.params = Some(params);
        self.state = Dx9State::DeviceCreated;
        Ok(())
    }

    /// Body of the EndScene hook
    pub fn end_scene<R>(&mut self, draw: &dyn Fn(), call_original: impl FnOnce() -> R) -> R {
        if self.state == Dx9State::DeviceCreated {
            self.overlay.with(|overlay| {
                drive_frame(overlay, draw);
                overlay.submit();
            });
        }
        call_original()
    }

    /// Body of the Reset hook
    ///
    /// Device objects are invalidated before the real reset and recreated
    /// after it. `params` replaces the snapshot when present.
    pub fn reset<R>(&mut self, params: Option<D::Params>, call_original: impl FnOnce() -> R) -> R {
        if self.state != Dx9State::DeviceCreated {
            return call_original();
        }

        self.overlay.with(|overlay| overlay.invalidate_device_objects());
        let result = call_original();
        if let Some(params) = params {
            self.params = Some(params);
        }
        self.overlay.with(|overlay| overlay.create_device_objects());
        result
    }

    pub fn shutdown(&mut self) {
        self.overlay.shutdown();
        self.device = None;
        self.params = None;
        self.state = Dx9State::Uninitialized;
    }
}
