//! Overlay renderer seam
//!
//! The overlay's visual content lives outside this crate. The pipelines only
//! drive it through [`OverlayRenderer`]: one frame per presented host frame,
//! plus device-object invalidation around resets.

use parking_lot::Mutex;

use crate::window::{OverlayInput, WindowMessage};

/// Backend-bound overlay renderer
pub trait OverlayRenderer: Send {
    /// Start building a frame
    fn begin_frame(&mut self);

    /// Finish building the frame
    fn end_frame(&mut self);

    /// Draw the finished frame into the currently bound target
    fn submit(&mut self);

    /// Feed a window message; `true` means it was consumed
    fn handle_message(&mut self, message: &WindowMessage) -> bool;

    /// Whether the overlay currently captures the pointer
    fn wants_pointer_input(&self) -> bool;

    /// Release GPU resources before a device reset
    fn invalidate_device_objects(&mut self) {}

    /// Recreate GPU resources after a device reset
    fn create_device_objects(&mut self) {}

    fn shutdown(&mut self) {}
}

/// Shared holder of the active overlay renderer
///
/// Empty until a pipeline reaches its device-created state.
#[derive(Default)]
pub struct OverlaySlot {
    renderer: Mutex<Option<Box<dyn OverlayRenderer>>>,
}

impl OverlaySlot {
    pub const fn new() -> Self {
        Self {
            renderer: Mutex::new(None),
        }
    }

    /// Install a renderer, shutting down any previous one
    pub fn install(&self, renderer: Box<dyn OverlayRenderer>) {
        if let Some(mut previous) = self.renderer.lock().replace(renderer) {
            previous.shutdown();
        }
    }

    /// Shut down and remove the renderer
    pub fn shutdown(&self) {
        if let Some(mut renderer) = self.renderer.lock().take() {
            renderer.shutdown();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.renderer.lock().is_some()
    }

    /// Run `f` on the renderer, if one is installed
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn OverlayRenderer) -> R) -> Option<R> {
        let mut guard = self.renderer.lock();
        let renderer = guard.as_mut()?;
        Some(f(&mut **renderer))
    }

    /// Like [`with`](Self::with), but gives up instead of waiting for the lock
    pub fn try_with<R>(&self, f: impl FnOnce(&mut dyn OverlayRenderer) -> R) -> Option<R> {
        let mut guard = self.renderer.try_lock()?;
        let renderer = guard.as_mut()?;
        Some(f(&mut **renderer))
    }
}

/// Build one overlay frame around the external draw callback
pub fn drive_frame(renderer: &mut dyn OverlayRenderer, draw: &dyn Fn()) {
    renderer.begin_frame();
    draw();
    renderer.end_frame();
}

/// Overlay input view combining the slot with the visibility query
///
/// Each query takes the slot lock only for its own duration, so the host's
/// message procedure never runs under it. The host may reset its device or
/// render a frame from inside that procedure. A busy or empty slot answers
/// as an overlay that wants nothing.
pub struct OverlayFront<'a, V: Fn() -> bool> {
    slot: &'a OverlaySlot,
    visible: V,
}

impl<'a, V: Fn() -> bool> OverlayFront<'a, V> {
    pub fn new(slot: &'a OverlaySlot, visible: V) -> Self {
        Self { slot, visible }
    }
}

impl<V: Fn() -> bool> OverlayInput for OverlayFront<'_, V> {
    fn is_visible(&self) -> bool {
        (self.visible)()
    }

    fn handle_message(&mut self, message: &WindowMessage) -> bool {
        self.slot
            .try_with(|renderer| renderer.handle_message(message))
            .unwrap_or(false)
    }

    fn wants_pointer_input(&self) -> bool {
        self.slot
            .try_with(|renderer| renderer.wants_pointer_input())
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Renderer that appends every call to a shared log
    pub(crate) struct LoggingOverlay {
        pub tag: &'static str,
        pub log: Arc<Mutex<Vec<String>>>,
        /// Whether messages are consumed
        pub consume: bool,
    }

    impl LoggingOverlay {
        pub fn boxed(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn OverlayRenderer> {
            Box::new(Self {
                tag,
                log: Arc::clone(log),
                consume: true,
            })
        }

        /// Overlay that sees every message but lets the host have it
        pub fn quiet(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn OverlayRenderer> {
            Box::new(Self {
                tag,
                log: Arc::clone(log),
                consume: false,
            })
        }

        fn push(&self, event: &str) {
            self.log.lock().push(format!("{}:{}", self.tag, event));
        }
    }

    impl OverlayRenderer for LoggingOverlay {
        fn begin_frame(&mut self) {
            self.push("begin");
        }

        fn end_frame(&mut self) {
            self.push("end");
        }

        fn submit(&mut self) {
            self.push("submit");
        }

        fn handle_message(&mut self, _message: &WindowMessage) -> bool {
            self.push("message");
            self.consume
        }

        fn wants_pointer_input(&self) -> bool {
            false
        }

        fn invalidate_device_objects(&mut self) {
            self.push("invalidate");
        }

        fn create_device_objects(&mut self) {
            self.push("create");
        }

        fn shutdown(&mut self) {
            self.push("shutdown");
        }
    }

    #[test]
    fn test_install_replaces_and_shuts_down() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = OverlaySlot::new();
        assert!(!slot.is_ready());
        assert!(slot.with(|_| ()).is_none());

        slot.install(LoggingOverlay::boxed("a", &log));
        slot.install(LoggingOverlay::boxed("b", &log));
        assert!(slot.is_ready());
        slot.shutdown();
        assert!(!slot.is_ready());

        assert_eq!(*log.lock(), vec!["a:shutdown", "b:shutdown"]);
    }

    #[test]
    fn test_try_with_gives_up_when_busy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = OverlaySlot::new();
        slot.install(LoggingOverlay::boxed("a", &log));

        let nested = slot.with(|_| slot.try_with(|_| ()));
        assert_eq!(nested, Some(None));
        assert_eq!(slot.try_with(|_| 5), Some(5));
    }

    #[test]
    fn test_drive_frame_wraps_draw() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut overlay = LoggingOverlay {
            tag: "o",
            log: Arc::clone(&log),
            consume: true,
        };
        let draw_log = Arc::clone(&log);
        drive_frame(&mut overlay, &|| draw_log.lock().push("draw".into()));
        assert_eq!(*log.lock(), vec!["o:begin", "draw", "o:end"]);
    }

    #[test]
    fn test_overlay_front_uses_visibility_query() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = OverlaySlot::new();
        slot.install(LoggingOverlay::boxed("o", &log));

        let mut front = OverlayFront::new(&slot, || true);
        assert!(front.is_visible());
        assert!(!front.wants_pointer_input());
        assert!(front.handle_message(&message()));
        assert_eq!(*log.lock(), vec!["o:message"]);
    }

    fn message() -> WindowMessage {
        WindowMessage {
            hwnd: 1,
            msg: 0x20,
            wparam: 0,
            lparam: 0,
        }
    }

    #[test]
    fn test_overlay_front_releases_slot_between_queries() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = OverlaySlot::new();
        slot.install(LoggingOverlay::boxed("o", &log));

        let mut front = OverlayFront::new(&slot, || false);
        assert!(front.handle_message(&message()));
        // Nothing is held once a query returns
        assert_eq!(slot.try_with(|_| 1), Some(1));
    }

    #[test]
    fn test_overlay_front_busy_or_empty_slot_wants_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot = OverlaySlot::new();
        {
            let mut front = OverlayFront::new(&slot, || true);
            assert!(!front.handle_message(&message()));
            assert!(!front.wants_pointer_input());
        }

        slot.install(LoggingOverlay::boxed("o", &log));
        let consumed = slot.with(|_| {
            let mut front = OverlayFront::new(&slot, || true);
            front.handle_message(&message())
        });
        assert_eq!(consumed, Some(false));
        assert!(log.lock().is_empty());
    }
}
