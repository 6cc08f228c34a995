//! File-open interception
//!
//! Decides, per open request, which file is actually opened. Only the final
//! path component is compared, case-sensitively, against the configured
//! names:
//!
//! - `passthrough` is always sent to `canonical`, so the generator can read
//!   the unmodified data without re-entering generation.
//! - The first open of `trigger` runs the generator exactly once. Success
//!   sends every open of `trigger` to `generated`; failure latches and
//!   every later open goes through unmodified.
//!
//! Concurrent openers of `trigger` wait on a single-flight gate while the
//! winner generates.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::config::RedirectConfig;

/// Produces the substituted resource
pub trait ResourceGenerator: Send + Sync {
    /// Generate the resource; `false` means it could not be produced
    fn generate(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> ResourceGenerator for F {
    fn generate(&self) -> bool {
        self()
    }
}

/// Where an open request should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRoute {
    /// Open the requested path unmodified
    Original,
    /// Open this path instead
    Redirect(String),
}

/// Outcome flags; each goes from false to true at most once
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileRedirectState {
    pub generated: bool,
    pub failed: bool,
}

#[derive(Debug, Default)]
struct Gate {
    state: FileRedirectState,
    /// Thread currently running the generator
    running_on: Option<ThreadId>,
}

/// Resource substitution for file opens
pub struct FileRedirector<G> {
    names: RedirectConfig,
    generator: G,
    gate: Mutex<Gate>,
    settled: Condvar,
}

impl<G: ResourceGenerator> FileRedirector<G> {
    pub fn new(names: RedirectConfig, generator: G) -> Self {
        Self {
            names,
            generator,
            gate: Mutex::new(Gate::default()),
            settled: Condvar::new(),
        }
    }

    /// Decide where an open of `path` goes
    ///
    /// May block while another thread generates the resource.
    pub fn route(&self, path: &str) -> OpenRoute {
        let name = file_name(path);

        if name == self.names.passthrough {
            return OpenRoute::Redirect(with_file_name(path, &self.names.canonical));
        }

        if name == self.names.trigger && self.ensure_generated() {
            return OpenRoute::Redirect(with_file_name(path, &self.names.generated));
        }

        OpenRoute::Original
    }

    /// Current outcome flags
    pub fn state(&self) -> FileRedirectState {
        self.gate.lock().state
    }

    /// Run the generator if nobody has, and report whether substitution is live
    fn ensure_generated(&self) -> bool {
        let me = thread::current().id();

        let mut gate = self.gate.lock();
        loop {
            if gate.state.failed {
                return false;
            }
            if gate.state.generated {
                return true;
            }
            match gate.running_on {
                // The generator itself opened the trigger name
                Some(owner) if owner == me => return false,
                Some(_) => self.settled.wait(&mut gate),
                None => break,
            }
        }
        gate.running_on = Some(me);
        drop(gate);

        tracing::info!("Generating '{}'", self.names.generated);
        let ok = match catch_unwind(AssertUnwindSafe(|| self.generator.generate())) {
            Ok(ok) => ok,
            Err(_) => {
                tracing::error!("Resource generator panicked");
                false
            }
        };

        let mut gate = self.gate.lock();
        gate.running_on = None;
        if ok {
            gate.state.generated = true;
            tracing::info!("Redirecting '{}' to '{}'", self.names.trigger, self.names.generated);
        } else {
            gate.state.failed = true;
            tracing::warn!(
                "Resource generation failed; '{}' will be opened unmodified",
                self.names.trigger
            );
        }
        self.settled.notify_all();
        ok
    }
}

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

/// Final path component
pub fn file_name(path: &str) -> &str {
    path.rsplit(is_separator).next().unwrap_or(path)
}

/// Replace the final path component, keeping the directory
pub fn with_file_name(path: &str, name: &str) -> String {
    match path.rfind(is_separator) {
        Some(index) => format!("{}{}", &path[..=index], name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn names() -> RedirectConfig {
        RedirectConfig {
            trigger: "data.win".into(),
            passthrough: "unmodded.win".into(),
            canonical: "data.win".into(),
            generated: "modded.win".into(),
        }
    }

    #[test]
    fn test_file_name_helpers() {
        assert_eq!(file_name(r"C:\Games\Host\data.win"), "data.win");
        assert_eq!(file_name("./assets/data.win"), "data.win");
        assert_eq!(file_name("data.win"), "data.win");
        assert_eq!(file_name(r"C:\Games\"), "");
        assert_eq!(
            with_file_name(r"C:\Games\Host\data.win", "modded.win"),
            r"C:\Games\Host\modded.win"
        );
        assert_eq!(with_file_name("data.win", "modded.win"), "modded.win");
    }

    #[test]
    fn test_unrelated_paths_pass_through() {
        let calls = AtomicUsize::new(0);
        let redirector = FileRedirector::new(names(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(redirector.route(r"C:\Games\Host\options.ini"), OpenRoute::Original);
        assert_eq!(redirector.route(r"C:\Games\Host\DATA.WIN"), OpenRoute::Original);
        assert_eq!(redirector.route(r"C:\data.win\save.dat"), OpenRoute::Original);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(redirector.state(), FileRedirectState::default());
    }

    #[test]
    fn test_trigger_generates_once() {
        let calls = AtomicUsize::new(0);
        let redirector = FileRedirector::new(names(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });

        for _ in 0..3 {
            assert_eq!(
                redirector.route(r"C:\Host\data.win"),
                OpenRoute::Redirect(r"C:\Host\modded.win".into())
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            redirector.state(),
            FileRedirectState {
                generated: true,
                failed: false
            }
        );
    }

    #[test]
    fn test_failure_latches() {
        let calls = AtomicUsize::new(0);
        let redirector = FileRedirector::new(names(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        });

        assert_eq!(redirector.route("data.win"), OpenRoute::Original);
        assert_eq!(redirector.route("data.win"), OpenRoute::Original);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(redirector.state().failed);
        assert!(!redirector.state().generated);

        // Passthrough still works after a failure
        assert_eq!(redirector.route("unmodded.win"), OpenRoute::Redirect("data.win".into()));
    }

    #[test]
    fn test_panicking_generator_counts_as_failure() {
        let redirector = FileRedirector::new(names(), || -> bool { panic!("generator exploded") });
        assert_eq!(redirector.route("data.win"), OpenRoute::Original);
        assert!(redirector.state().failed);
    }

    #[test]
    fn test_passthrough_during_generation_does_not_recurse() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner: Arc<Mutex<Option<Vec<OpenRoute>>>> = Arc::new(Mutex::new(None));

        let redirector: Arc<FileRedirector<Box<dyn Fn() -> bool + Send + Sync>>> = {
            let calls = Arc::clone(&calls);
            Arc::new_cyclic(|weak: &std::sync::Weak<FileRedirector<_>>| {
                let weak = weak.clone();
                let inner = Arc::clone(&inner);
                let generator: Box<dyn Fn() -> bool + Send + Sync> = Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let Some(this) = weak.upgrade() else {
                        return false;
                    };
                    // The generator reads the original data through both names
                    let routes = vec![this.route(r"C:\Host\unmodded.win"), this.route(r"C:\Host\data.win")];
                    *inner.lock() = Some(routes);
                    true
                });
                FileRedirector::new(names(), generator)
            })
        };

        assert_eq!(
            redirector.route(r"C:\Host\data.win"),
            OpenRoute::Redirect(r"C:\Host\modded.win".into())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            inner.lock().clone(),
            Some(vec![
                OpenRoute::Redirect(r"C:\Host\data.win".into()),
                OpenRoute::Original,
            ])
        );
    }

    #[test]
    fn test_concurrent_openers_share_one_generation() {
        const THREADS: usize = 8;
        let calls = Arc::new(AtomicUsize::new(0));
        let redirector = {
            let calls = Arc::clone(&calls);
            Arc::new(FileRedirector::new(names(), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                true
            }))
        };
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let redirector = Arc::clone(&redirector);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    redirector.route(r"C:\Host\data.win")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(
                handle.join().unwrap(),
                OpenRoute::Redirect(r"C:\Host\modded.win".into())
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!redirector.state().failed);
    }
}
