//! Overlay bound to the captured device
//!
//! No renderer ships with the module: the overlay only frames the bridge's
//! draw callback and never claims input.

use std::sync::{Arc, LazyLock};

use modhost_core::{OverlayRenderer, OverlaySlot, WindowMessage};
use modhost_engine::Backend;

static OVERLAY: LazyLock<Arc<OverlaySlot>> = LazyLock::new(|| Arc::new(OverlaySlot::new()));

/// The overlay shared by both pipelines and the window procedure
pub fn overlay() -> &'static Arc<OverlaySlot> {
    &OVERLAY
}

pub struct BridgeOverlay {
    backend: Backend,
    frames: u64,
}

impl BridgeOverlay {
    pub fn boxed(backend: Backend) -> Box<dyn OverlayRenderer> {
        tracing::info!("Overlay bound to {} device", backend);
        Box::new(Self { backend, frames: 0 })
    }
}

impl OverlayRenderer for BridgeOverlay {
    fn begin_frame(&mut self) {
        if self.frames == 0 {
            tracing::debug!("First {} overlay frame", self.backend);
        }
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }

    fn submit(&mut self) {}

    fn handle_message(&mut self, _message: &WindowMessage) -> bool {
        false
    }

    fn wants_pointer_input(&self) -> bool {
        false
    }

    fn invalidate_device_objects(&mut self) {
        tracing::debug!("Invalidating {} overlay objects", self.backend);
    }

    fn shutdown(&mut self) {
        tracing::info!("{} overlay shut down after {} frames", self.backend, self.frames);
    }
}
