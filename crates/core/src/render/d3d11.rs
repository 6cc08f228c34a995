//! D3D11 render pipeline
//!
//! ```text
//! Uninitialized --device created--> DeviceCreated <--> Resizing
//! ```
//!
//! Device creation probes a throwaway swap chain for the Present and
//! ResizeBuffers entries, hooks both, and binds the overlay to the device.
//! The render target view is created lazily on the first Present of each
//! validity period and dropped for the duration of every ResizeBuffers.

use std::sync::Arc;

use super::dispatch::{DispatchSlot, DispatchTable, HookInstaller};
use super::error::RenderError;
use super::overlay::{drive_frame, OverlayRenderer, OverlaySlot};

/// Device-side operations the pipeline needs
pub trait Dx11Device {
    /// Swap chain handed to Present and ResizeBuffers
    type SwapChain: ?Sized;

    /// Render target view over a back buffer; dropping it releases the view
    type RenderTarget;

    /// Create a throwaway swap chain on the host window, read its dispatch
    /// entries and release it
    fn probe_swap_chain(&mut self) -> Result<DispatchTable, RenderError>;

    /// Create a view over the swap chain's current back buffer
    fn create_render_target(
        &mut self,
        swap_chain: &Self::SwapChain,
    ) -> Result<Self::RenderTarget, RenderError>;

    /// Bind the view as the output of the immediate context
    fn bind_render_target(&mut self, target: &Self::RenderTarget);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dx11State {
    Uninitialized,
    DeviceCreated,
    Resizing,
}

pub struct Dx11Pipeline<D: Dx11Device> {
    state: Dx11State,
    device: Option<D>,
    render_target: Option<D::RenderTarget>,
    dispatch: DispatchTable,
    overlay: Arc<OverlaySlot>,
}

impl<D: Dx11Device> Dx11Pipeline<D> {
    pub fn new(overlay: Arc<OverlaySlot>) -> Self {
        Self {
            state: Dx11State::Uninitialized,
            device: None,
            render_target: None,
            dispatch: DispatchTable::default(),
            overlay,
        }
    }

    pub fn state(&self) -> Dx11State {
        self.state
    }

    pub fn has_render_target(&self) -> bool {
        self.render_target.is_some()
    }

    /// Entries hooked so far
    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Handle a device returned by the real device-creation call
    ///
    /// On any error the pipeline stays uninitialized: nothing is hooked and
    /// no overlay exists. A later device is bound to the overlay without
    /// hooking again, since every swap chain shares the same entries.
    #[tracing::instrument(skip_all)]
    pub fn on_device_created(
        &mut self,
        mut device: D,
        installer: &mut dyn HookInstaller,
        make_overlay: impl FnOnce(&mut D) -> Box<dyn OverlayRenderer>,
    ) -> Result<(), RenderError> {
        if self.state != Dx11State::Uninitialized {
            self.render_target = None;
            self.overlay.install(make_overlay(&mut device));
            self.device = Some(device);
            self.state = Dx11State::DeviceCreated;
            tracing::info!("Overlay rebound to a new D3D11 device");
            return Ok(());
        }

        let probed = device.probe_swap_chain()?;
        let entries = probed.require(&[DispatchSlot::Present, DispatchSlot::ResizeBuffers])?;
        installer.install(&entries)?;
        self.dispatch.merge(&probed);

        self.overlay.install(make_overlay(&mut device));
        self.device = Some(device);
        self.state = Dx11State::DeviceCreated;
        tracing::info!("D3D11 pipeline ready");
        Ok(())
    }

    /// Body of the Present hook
    ///
    /// Renders one overlay frame into the swap chain's back buffer, then
    /// runs `call_original`.
    pub fn present<R>(
        &mut self,
        swap_chain: &D::SwapChain,
        draw: &dyn Fn(),
        call_original: impl FnOnce() -> R,
    ) -> R {
        if self.state == Dx11State::DeviceCreated {
            self.render_frame(swap_chain, draw);
        }
        call_original()
    }

    fn render_frame(&mut self, swap_chain: &D::SwapChain, draw: &dyn Fn()) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        if self.render_target.is_none() {
            match device.create_render_target(swap_chain) {
                Ok(target) => self.render_target = Some(target),
                Err(e) => {
                    tracing::debug!("Skipping overlay frame: {}", e);
                    return;
                }
            }
        }
        let Some(target) = self.render_target.as_ref() else {
            return;
        };

        self.overlay.with(|overlay| {
            drive_frame(overlay, draw);
            device.bind_render_target(target);
            overlay.submit();
        });
    }

    /// Body of the ResizeBuffers hook
    ///
    /// The view pins the back buffer, so it is released before
    /// `call_original` and recreated right after.
    pub fn resize_buffers<R>(
        &mut self,
        swap_chain: &D::SwapChain,
        call_original: impl FnOnce() -> R,
    ) -> R {
        if self.state != Dx11State::DeviceCreated {
            return call_original();
        }

        self.render_target = None;
        self.state = Dx11State::Resizing;
        let result = call_original();
        self.state = Dx11State::DeviceCreated;

        if let Some(device) = self.device.as_mut() {
            match device.create_render_target(swap_chain) {
                Ok(target) => self.render_target = Some(target),
                Err(e) => tracing::debug!("Render target deferred to next present: {}", e),
            }
        }
        result
    }

    /// Release the view, the overlay and the device
    pub fn shutdown(&mut self) {
        self.render_target = None;
        self.overlay.shutdown();
        self.device = None;
        self.state = Dx11State::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::dispatch::tests::RecordingInstaller;
    use crate::render::overlay::tests::LoggingOverlay;
    use crate::render::overlay::OverlayFront;
    use crate::window::{route_message, WindowHost, WindowMessage};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;
    use std::sync::atomic::{AtomicIsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeSwapChain {
        width: u32,
        height: u32,
    }

    struct FakeTarget {
        id: u32,
        log: Log,
        live: Arc<AtomicIsize>,
    }

    impl Drop for FakeTarget {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().push(format!("release rt{}", self.id));
        }
    }

    struct FakeDevice {
        log: Log,
        live: Arc<AtomicIsize>,
        probe: Option<DispatchTable>,
        created: u32,
    }

    impl Dx11Device for FakeDevice {
        type SwapChain = FakeSwapChain;
        type RenderTarget = FakeTarget;

        fn probe_swap_chain(&mut self) -> Result<DispatchTable, RenderError> {
            self.log.lock().push("probe".into());
            self.probe
                .ok_or_else(|| RenderError::Probe("CreateSwapChain failed".into()))
        }

        fn create_render_target(
            &mut self,
            swap_chain: &FakeSwapChain,
        ) -> Result<FakeTarget, RenderError> {
            self.created += 1;
            self.live.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(format!(
                "create rt{} {}x{}",
                self.created, swap_chain.width, swap_chain.height
            ));
            Ok(FakeTarget {
                id: self.created,
                log: Arc::clone(&self.log),
                live: Arc::clone(&self.live),
            })
        }

        fn bind_render_target(&mut self, target: &FakeTarget) {
            self.log.lock().push(format!("bind rt{}", target.id));
        }
    }

    fn swap_chain_entries() -> DispatchTable {
        DispatchTable {
            present: Some(0x5008),
            resize_buffers: Some(0x5013),
            ..Default::default()
        }
    }

    struct Harness {
        log: Log,
        live: Arc<AtomicIsize>,
        overlay: Arc<OverlaySlot>,
        pipeline: Dx11Pipeline<FakeDevice>,
        installer: RecordingInstaller,
    }

    impl Harness {
        fn new() -> Self {
            let overlay = Arc::new(OverlaySlot::new());
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                live: Arc::new(AtomicIsize::new(0)),
                pipeline: Dx11Pipeline::new(Arc::clone(&overlay)),
                overlay,
                installer: RecordingInstaller::default(),
            }
        }

        fn device(&self, probe: Option<DispatchTable>) -> FakeDevice {
            FakeDevice {
                log: Arc::clone(&self.log),
                live: Arc::clone(&self.live),
                probe,
                created: 0,
            }
        }

        fn create(&mut self, probe: Option<DispatchTable>, tag: &'static str) -> Result<(), RenderError> {
            let device = self.device(probe);
            let log = Arc::clone(&self.log);
            self.pipeline
                .on_device_created(device, &mut self.installer, |_| LoggingOverlay::boxed(tag, &log))
        }

        fn present(&mut self, swap_chain: &FakeSwapChain) -> i32 {
            let live = Arc::clone(&self.live);
            let draw_log = Arc::clone(&self.log);
            let log = Arc::clone(&self.log);
            self.pipeline.present(
                swap_chain,
                &|| draw_log.lock().push("draw".into()),
                || {
                    log.lock().push("present".into());
                    live.load(Ordering::SeqCst) as i32
                },
            )
        }

        fn resize(&mut self, swap_chain: &FakeSwapChain) -> i32 {
            let live = Arc::clone(&self.live);
            let log = Arc::clone(&self.log);
            let (width, height) = (swap_chain.width, swap_chain.height);
            self.pipeline.resize_buffers(swap_chain, || {
                log.lock().push(format!("resize {}x{}", width, height));
                live.load(Ordering::SeqCst) as i32
            })
        }

        fn take_log(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock())
        }
    }

    #[test]
    fn test_device_created_hooks_present_and_resize() {
        let mut h = Harness::new();
        h.create(Some(swap_chain_entries()), "o").unwrap();

        assert_eq!(h.pipeline.state(), Dx11State::DeviceCreated);
        assert_eq!(
            h.installer.installed,
            vec![(DispatchSlot::Present, 0x5008), (DispatchSlot::ResizeBuffers, 0x5013)]
        );
        assert_eq!(h.pipeline.dispatch().present, Some(0x5008));
        assert!(h.overlay.is_ready());
        // View is created lazily
        assert!(!h.pipeline.has_render_target());
        assert_eq!(h.take_log(), vec!["probe"]);
    }

    #[test]
    fn test_create_present_resize_present() {
        let mut h = Harness::new();
        h.create(Some(swap_chain_entries()), "o").unwrap();
        h.take_log();

        let window = FakeSwapChain {
            width: 1280,
            height: 720,
        };
        assert_eq!(h.present(&window), 1);
        assert_eq!(
            h.take_log(),
            vec![
                "create rt1 1280x720",
                "o:begin",
                "draw",
                "o:end",
                "bind rt1",
                "o:submit",
                "present"
            ]
        );

        let resized = FakeSwapChain {
            width: 800,
            height: 600,
        };
        assert_eq!(h.resize(&resized), 0, "view must not exist during resize");
        assert_eq!(
            h.take_log(),
            vec!["release rt1", "resize 800x600", "create rt2 800x600"]
        );
        assert!(h.pipeline.has_render_target());

        assert_eq!(h.present(&resized), 1);
        assert_eq!(
            h.take_log(),
            vec!["o:begin", "draw", "o:end", "bind rt2", "o:submit", "present"]
        );
    }

    #[test]
    fn test_view_exists_before_every_present() {
        let mut h = Harness::new();
        h.create(Some(swap_chain_entries()), "o").unwrap();

        let chain = FakeSwapChain {
            width: 640,
            height: 480,
        };
        let script = "PPRPRRPPRP";
        for step in script.chars() {
            match step {
                'P' => assert_eq!(h.present(&chain), 1),
                _ => assert_eq!(h.resize(&chain), 0),
            }
        }
        assert_eq!(h.live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_failure_leaves_host_unmodified() {
        let mut h = Harness::new();
        let err = h.create(None, "o").unwrap_err();
        assert!(matches!(err, RenderError::Probe(_)));

        assert_eq!(h.pipeline.state(), Dx11State::Uninitialized);
        assert_eq!(h.installer.calls, 0);
        assert!(!h.overlay.is_ready());
        h.take_log();

        let chain = FakeSwapChain {
            width: 640,
            height: 480,
        };
        h.present(&chain);
        h.resize(&chain);
        assert_eq!(h.take_log(), vec!["present", "resize 640x480"]);
    }

    #[test]
    fn test_missing_entry_is_not_hooked() {
        let mut h = Harness::new();
        let partial = DispatchTable {
            present: Some(0x5008),
            ..Default::default()
        };
        let err = h.create(Some(partial), "o").unwrap_err();
        assert!(matches!(err, RenderError::MissingSlot(_)));
        assert_eq!(h.installer.calls, 0);
        assert_eq!(h.pipeline.state(), Dx11State::Uninitialized);
    }

    #[test]
    fn test_install_failure_skips_overlay() {
        let mut h = Harness::new();
        h.installer.fail = true;
        assert!(h.create(Some(swap_chain_entries()), "o").is_err());
        assert_eq!(h.pipeline.state(), Dx11State::Uninitialized);
        assert!(!h.overlay.is_ready());
    }

    #[test]
    fn test_second_device_rebinds_overlay() {
        let mut h = Harness::new();
        h.create(Some(swap_chain_entries()), "first").unwrap();
        let chain = FakeSwapChain {
            width: 640,
            height: 480,
        };
        h.present(&chain);
        h.take_log();

        h.create(Some(swap_chain_entries()), "second").unwrap();
        assert_eq!(h.installer.calls, 1);
        assert_eq!(h.take_log(), vec!["release rt1", "first:shutdown"]);

        h.present(&chain);
        let log = h.take_log();
        assert!(log.contains(&"second:submit".to_string()));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut h = Harness::new();
        h.create(Some(swap_chain_entries()), "o").unwrap();
        let chain = FakeSwapChain {
            width: 640,
            height: 480,
        };
        h.present(&chain);
        h.take_log();

        h.pipeline.shutdown();
        assert_eq!(h.take_log(), vec!["release rt1", "o:shutdown"]);
        assert_eq!(h.pipeline.state(), Dx11State::Uninitialized);
        assert!(h.pipeline.device().is_none());
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
    }

    /// Host procedure that presents and resizes inside a modal size loop
    struct SizingWindow {
        pipeline: Arc<Mutex<Dx11Pipeline<FakeDevice>>>,
    }

    impl WindowHost for SizingWindow {
        fn call_original(&self, _message: &WindowMessage) -> isize {
            let mut pipeline = self.pipeline.lock();
            let resized = FakeSwapChain {
                width: 640,
                height: 480,
            };
            pipeline.present(&resized, &|| (), || ());
            pipeline.resize_buffers(&resized, || 4)
        }

        fn default_proc(&self, _message: &WindowMessage) -> isize {
            0
        }

        fn cursor(&self) -> usize {
            0
        }

        fn set_cursor(&self, _cursor: usize) {}
    }

    #[test]
    fn test_present_from_routed_window_message() {
        const WM_ENTERSIZEMOVE: u32 = 0x0231;
        let mut h = Harness::new();
        let device = h.device(Some(swap_chain_entries()));
        let log = Arc::clone(&h.log);
        h.pipeline
            .on_device_created(device, &mut h.installer, |_| LoggingOverlay::quiet("o", &log))
            .unwrap();
        h.take_log();

        let Harness {
            log,
            overlay,
            pipeline,
            ..
        } = h;
        let window = SizingWindow {
            pipeline: Arc::new(Mutex::new(pipeline)),
        };
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut front = OverlayFront::new(&overlay, || false);
            let message = WindowMessage {
                hwnd: 1,
                msg: WM_ENTERSIZEMOVE,
                wparam: 0,
                lparam: 0,
            };
            let _ = tx.send(route_message(&window, Some(&mut front), &message));
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).ok(), Some(4));
        let events = log.lock().clone();
        assert_eq!(
            &events[..8],
            &[
                "o:message",
                "create rt1 640x480",
                "o:begin",
                "o:end",
                "bind rt1",
                "o:submit",
                "release rt1",
                "create rt2 640x480",
            ]
        );
    }
}
