//! Dispatch table resolution
//!
//! The entry points we hook on graphics objects are only discoverable from
//! a live instance. They are read once from the object's vtable into a
//! [`DispatchTable`] and used from there.

use std::ffi::c_void;

use modhost_sdk::interfaces::{
    DEVICE9_END_SCENE, DEVICE9_RESET, DIRECT3D9_CREATE_DEVICE, SWAP_CHAIN_PRESENT,
    SWAP_CHAIN_RESIZE_BUFFERS,
};

use super::error::RenderError;

/// Named entry of a graphics interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchSlot {
    /// `IDXGISwapChain::Present`
    Present,
    /// `IDXGISwapChain::ResizeBuffers`
    ResizeBuffers,
    /// `IDirect3D9::CreateDevice`
    CreateDevice,
    /// `IDirect3DDevice9::EndScene`
    EndScene,
    /// `IDirect3DDevice9::Reset`
    Reset,
}

impl DispatchSlot {
    /// Index in the object's vtable
    pub const fn index(self) -> usize {
        match self {
            DispatchSlot::Present => SWAP_CHAIN_PRESENT,
            DispatchSlot::ResizeBuffers => SWAP_CHAIN_RESIZE_BUFFERS,
            DispatchSlot::CreateDevice => DIRECT3D9_CREATE_DEVICE,
            DispatchSlot::EndScene => DEVICE9_END_SCENE,
            DispatchSlot::Reset => DEVICE9_RESET,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DispatchSlot::Present => "IDXGISwapChain::Present",
            DispatchSlot::ResizeBuffers => "IDXGISwapChain::ResizeBuffers",
            DispatchSlot::CreateDevice => "IDirect3D9::CreateDevice",
            DispatchSlot::EndScene => "IDirect3DDevice9::EndScene",
            DispatchSlot::Reset => "IDirect3DDevice9::Reset",
        }
    }
}

/// Resolved entry addresses
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTable {
    pub present: Option<usize>,
    pub resize_buffers: Option<usize>,
    pub create_device: Option<usize>,
    pub end_scene: Option<usize>,
    pub reset: Option<usize>,
}

impl DispatchTable {
    pub fn get(&self, slot: DispatchSlot) -> Option<usize> {
        match slot {
            DispatchSlot::Present => self.present,
            DispatchSlot::ResizeBuffers => self.resize_buffers,
            DispatchSlot::CreateDevice => self.create_device,
            DispatchSlot::EndScene => self.end_scene,
            DispatchSlot::Reset => self.reset,
        }
    }

    pub fn set(&mut self, slot: DispatchSlot, address: usize) {
        let entry = match slot {
            DispatchSlot::Present => &mut self.present,
            DispatchSlot::ResizeBuffers => &mut self.resize_buffers,
            DispatchSlot::CreateDevice => &mut self.create_device,
            DispatchSlot::EndScene => &mut self.end_scene,
            DispatchSlot::Reset => &mut self.reset,
        };
        *entry = (address != 0).then_some(address);
    }

    /// Copy every slot resolved in `other` into this table
    pub fn merge(&mut self, other: &DispatchTable) {
        for slot in ALL_SLOTS {
            if let Some(address) = other.get(slot) {
                self.set(slot, address);
            }
        }
    }

    /// Read `slots` from the vtable of a live object
    ///
    /// # Safety
    /// `object` must point to a live COM object whose interface has every
    /// requested slot.
    pub unsafe fn resolve(
        object: *const c_void,
        slots: &[DispatchSlot],
    ) -> Result<Self, RenderError> {
        if object.is_null() {
            return Err(RenderError::NullObject("interface"));
        }
        let vtable = *(object as *const *const usize);
        if vtable.is_null() {
            return Err(RenderError::NullObject("vtable"));
        }

        let mut table = DispatchTable::default();
        for &slot in slots {
            let address = *vtable.add(slot.index());
            tracing::debug!("{} = {:#x}", slot.name(), address);
            table.set(slot, address);
        }
        Ok(table)
    }

    /// Addresses of `slots`, failing on the first one missing
    pub fn require(
        &self,
        slots: &[DispatchSlot],
    ) -> Result<Vec<(DispatchSlot, usize)>, RenderError> {
        slots
            .iter()
            .map(|&slot| {
                self.get(slot)
                    .map(|address| (slot, address))
                    .ok_or(RenderError::MissingSlot(slot.name()))
            })
            .collect()
    }
}

const ALL_SLOTS: [DispatchSlot; 5] = [
    DispatchSlot::Present,
    DispatchSlot::ResizeBuffers,
    DispatchSlot::CreateDevice,
    DispatchSlot::EndScene,
    DispatchSlot::Reset,
];

/// Installs hooks on resolved entries
///
/// Every call is one transaction: either all entries are hooked or none.
pub trait HookInstaller {
    fn install(&mut self, entries: &[(DispatchSlot, usize)]) -> Result<(), RenderError>;
}
