//! One-shot graphics backend detection
//!
//! The decision is made from module residency at injection time: a host that
//! already mapped the D3D11 module renders with D3D11. Otherwise the D3D9
//! module is loaded on demand, and if that also fails there is no overlay.

use std::fmt;
use std::sync::OnceLock;

use modhost_sdk::names::{D3D11_MODULE, D3D9_MODULE};

use crate::loader::{ModuleApi, ModuleHandle};

/// Graphics API the host renders with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    D3D11,
    D3D9,
    /// No supported backend; the host runs without render hooks
    None,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::D3D11 => write!(f, "D3D11"),
            Backend::D3D9 => write!(f, "D3D9"),
            Backend::None => write!(f, "none"),
        }
    }
}

/// Detected backend together with the module that provides it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendChoice {
    pub backend: Backend,
    /// Module of the chosen backend; `None` when `backend` is `Backend::None`
    pub module: Option<ModuleHandle>,
}

impl BackendChoice {
    const NONE: Self = Self {
        backend: Backend::None,
        module: None,
    };
}

/// Caches the first detection result for its lifetime
#[derive(Debug, Default)]
pub struct BackendDetector {
    choice: OnceLock<BackendChoice>,
}

impl BackendDetector {
    pub const fn new() -> Self {
        Self {
            choice: OnceLock::new(),
        }
    }

    /// Detect the backend, or return the cached decision
    ///
    /// Only the first call inspects `api`; later calls return the same value
    /// even if module residency has changed since.
    pub fn detect(&self, api: &dyn ModuleApi) -> BackendChoice {
        *self.choice.get_or_init(|| {
            let choice = probe(api);
            tracing::info!("Graphics backend: {}", choice.backend);
            choice
        })
    }

    /// The cached decision, if detection has run
    pub fn get(&self) -> Option<BackendChoice> {
        self.choice.get().copied()
    }
}

fn probe(api: &dyn ModuleApi) -> BackendChoice {
    if let Some(module) = api.find_resident(D3D11_MODULE) {
        return BackendChoice {
            backend: Backend::D3D11,
            module: Some(module),
        };
    }

    match api.load(D3D9_MODULE) {
        Some(module) => BackendChoice {
            backend: Backend::D3D9,
            module: Some(module),
        },
        None => {
            tracing::warn!("Neither {} nor {} is available", D3D11_MODULE, D3D9_MODULE);
            BackendChoice::NONE
        }
    }
}

/// Process-wide detector
static DETECTOR: BackendDetector = BackendDetector::new();

/// Detect the process backend
///
/// Runs the probe once per process; every later call returns the same choice.
pub fn detect_backend(api: &dyn ModuleApi) -> BackendChoice {
    DETECTOR.detect(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::FakeModules;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_resident_d3d11_wins_over_loadable_d3d9() {
        let mut fake = FakeModules::default();
        fake.resident.insert(D3D11_MODULE.into(), 0x1100);
        fake.loadable.insert(D3D9_MODULE.into(), 0x0900);

        let detector = BackendDetector::new();
        let choice = detector.detect(&fake);
        assert_eq!(choice.backend, Backend::D3D11);
        assert_eq!(choice.module, Some(ModuleHandle(0x1100)));
        // D3D9 was never loaded
        assert_eq!(fake.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_loadable_d3d9() {
        let mut fake = FakeModules::default();
        fake.loadable.insert(D3D9_MODULE.into(), 0x0900);

        let choice = BackendDetector::new().detect(&fake);
        assert_eq!(choice.backend, Backend::D3D9);
        assert_eq!(choice.module, Some(ModuleHandle(0x0900)));
    }

    #[test]
    fn test_no_backend_is_not_fatal() {
        let fake = FakeModules::default();
        let choice = BackendDetector::new().detect(&fake);
        assert_eq!(choice, BackendChoice::NONE);
    }

    #[test]
    fn test_decision_is_immutable() {
        let detector = BackendDetector::new();
        let none = FakeModules::default();
        assert_eq!(detector.detect(&none).backend, Backend::None);

        // D3D11 appears later; the cached decision stands
        let mut later = FakeModules::default();
        later.resident.insert(D3D11_MODULE.into(), 0x1100);
        for _ in 0..3 {
            assert_eq!(detector.detect(&later).backend, Backend::None);
        }
        assert_eq!(later.loads.load(Ordering::SeqCst), 0);
        assert_eq!(detector.get().map(|c| c.backend), Some(Backend::None));
    }
}
