//! Batched, reversible hook installation
//!
//! A [`HookContext`] owns every [`HookRecord`] in the process. Attach and
//! detach requests are queued inside a batch and applied together by
//! [`HookContext::commit`]: other threads are frozen, every queued write is
//! performed, and if any write fails the ones already made are reverted
//! before the threads resume. No partial batch is ever observable.

use slotmap::{new_key_type, SlotMap};

use super::error::HookError;
use super::patcher::{CodePatcher, PreparedPatch};

new_key_type! {
    /// Handle for a hook record
    pub struct HookKey;
}

/// One redirection owned by the context
#[derive(Debug)]
pub struct HookRecord {
    /// Debug name
    pub name: String,

    /// Entry address being redirected
    pub target: usize,

    /// Address that calls through to the unpatched code
    pub original: usize,

    /// Our replacement function
    pub replacement: usize,

    /// Whether the patch is currently written
    pub installed: bool,

    patch: PreparedPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Attach(HookKey),
    Detach(HookKey),
}

impl PendingOp {
    fn key(self) -> HookKey {
        match self {
            PendingOp::Attach(key) | PendingOp::Detach(key) => key,
        }
    }

    fn installs(self) -> bool {
        matches!(self, PendingOp::Attach(_))
    }
}

#[derive(Default)]
struct Batch {
    ops: Vec<PendingOp>,
    /// First attach error; poisons the whole batch
    failure: Option<HookError>,
}

/// Owner of all hook records and the open batch
pub struct HookContext<P: CodePatcher> {
    patcher: P,
    hooks: SlotMap<HookKey, HookRecord>,
    batch: Option<Batch>,
}

impl<P: CodePatcher> HookContext<P> {
    pub fn new(patcher: P) -> Self {
        Self {
            patcher,
            hooks: SlotMap::with_key(),
            batch: None,
        }
    }

    /// Open a batch
    pub fn begin(&mut self) -> Result<(), HookError> {
        if self.batch.is_some() {
            return Err(HookError::TransactionOpen);
        }
        self.batch = Some(Batch::default());
        Ok(())
    }

    /// Whether a batch is open
    pub fn in_transaction(&self) -> bool {
        self.batch.is_some()
    }

    /// Queue a redirection of `target` to `replacement`
    ///
    /// Returns the record key and the call-through address the replacement
    /// must use to reach the original code. A failure here poisons the open
    /// batch: the following [`commit`](Self::commit) rolls everything back.
    ///
    /// # Safety
    /// `target` must be the entry of a live function and `replacement` a
    /// function with a compatible signature and calling convention.
    pub unsafe fn attach(
        &mut self,
        name: &str,
        target: usize,
        replacement: usize,
    ) -> Result<(HookKey, usize), HookError> {
        let batch = self.batch.as_mut().ok_or(HookError::NoTransaction)?;

        let result = if self.hooks.values().any(|h| h.target == target) {
            Err(HookError::AlreadyHooked(target))
        } else {
            self.patcher.prepare(target, replacement)
        };

        let patch = match result {
            Ok(patch) => patch,
            Err(e) => {
                let e = e.named(name);
                tracing::error!("Failed to prepare hook '{}' at {:#x}: {}", name, target, e);
                batch.failure.get_or_insert_with(|| e.clone());
                return Err(e);
            }
        };

        tracing::debug!(
            "Queued hook '{}' at {:#x} -> {:#x} (call-through {:#x}, {} bytes)",
            name,
            target,
            replacement,
            patch.call_through,
            patch.len()
        );

        let original = patch.call_through;
        let key = self.hooks.insert(HookRecord {
            name: name.to_string(),
            target,
            original,
            replacement,
            installed: false,
            patch,
        });
        batch.ops.push(PendingOp::Attach(key));
        Ok((key, original))
    }

    /// Queue removal of a hook
    ///
    /// A key that was never installed (or no longer exists) is a no-op. A
    /// key attached earlier in the same batch is simply dropped from it.
    pub fn detach(&mut self, key: HookKey) -> Result<(), HookError> {
        let batch = self.batch.as_mut().ok_or(HookError::NoTransaction)?;

        if let Some(pos) = batch.ops.iter().position(|op| *op == PendingOp::Attach(key)) {
            batch.ops.remove(pos);
            self.hooks.remove(key);
            return Ok(());
        }

        match self.hooks.get(key) {
            Some(record) if record.installed => {
                if !batch.ops.contains(&PendingOp::Detach(key)) {
                    batch.ops.push(PendingOp::Detach(key));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply the open batch as a single unit
    pub fn commit(&mut self) -> Result<(), HookError> {
        let batch = self.batch.take().ok_or(HookError::NoTransaction)?;

        if let Some(err) = batch.failure {
            self.discard(&batch.ops);
            tracing::error!("Hook transaction rolled back: {}", err);
            return Err(err);
        }
        if batch.ops.is_empty() {
            return Ok(());
        }

        let Self { patcher, hooks, .. } = &mut *self;

        let mut writes: Vec<(&PreparedPatch, bool)> = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            let record = hooks.get(op.key()).ok_or(HookError::NotFound)?;
            writes.push((&record.patch, op.installs()));
        }
        let mut applied: Vec<(&PreparedPatch, bool)> = Vec::with_capacity(writes.len());

        let frozen = match patcher.freeze() {
            Ok(frozen) => frozen,
            Err(e) => {
                drop(writes);
                drop(applied);
                self.discard(&batch.ops);
                tracing::error!("Hook transaction aborted: {}", e);
                return Err(e);
            }
        };

        // Nothing below may allocate or log until thaw
        let mut failed_at = None;
        for (index, &(patch, install)) in writes.iter().enumerate() {
            // SAFETY: every patch was prepared by this patcher
            match unsafe { patcher.write(patch, install) } {
                Ok(()) => applied.push((patch, install)),
                Err(e) => {
                    failed_at = Some((index, e));
                    break;
                }
            }
        }
        if failed_at.is_some() {
            while let Some((patch, install)) = applied.pop() {
                // SAFETY: reverting a write made above
                let _ = unsafe { patcher.write(patch, !install) };
            }
        }

        patcher.thaw(frozen, &applied);
        drop(applied);
        drop(writes);

        if let Some((index, err)) = failed_at {
            let name = self
                .hooks
                .get(batch.ops[index].key())
                .map(|r| r.name.clone())
                .unwrap_or_default();
            self.discard(&batch.ops);
            let err = err.named(&name);
            tracing::error!("Hook transaction rolled back: {}", err);
            return Err(err);
        }

        for op in &batch.ops {
            match *op {
                PendingOp::Attach(key) => {
                    if let Some(record) = self.hooks.get_mut(key) {
                        record.installed = true;
                        tracing::info!("Installed hook '{}' at {:#x}", record.name, record.target);
                    }
                }
                PendingOp::Detach(key) => {
                    if let Some(record) = self.hooks.remove(key) {
                        tracing::info!("Removed hook '{}' at {:#x}", record.name, record.target);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop the open batch without writing anything
    pub fn abort(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.discard(&batch.ops);
        }
    }

    /// Run `f` inside a batch, committing on success and aborting on error
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, HookError>,
    ) -> Result<T, HookError> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Remove every installed hook in one batch
    pub fn detach_all(&mut self) -> Result<(), HookError> {
        let keys: Vec<HookKey> = self
            .hooks
            .iter()
            .filter(|(_, record)| record.installed)
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.transaction(|ctx| {
            for key in keys {
                ctx.detach(key)?;
            }
            Ok(())
        })
    }

    /// Check if a hook is installed
    pub fn is_installed(&self, key: HookKey) -> bool {
        self.hooks.get(key).map(|r| r.installed).unwrap_or(false)
    }

    /// Call-through address of a hook
    pub fn original(&self, key: HookKey) -> Option<usize> {
        self.hooks.get(key).map(|r| r.original)
    }

    /// Look up a hook record
    pub fn record(&self, key: HookKey) -> Option<&HookRecord> {
        self.hooks.get(key)
    }

    /// Number of installed hooks
    pub fn installed_count(&self) -> usize {
        self.hooks.values().filter(|r| r.installed).count()
    }

    pub fn patcher(&self) -> &P {
        &self.patcher
    }

    /// Forget records created by attaches in a batch that did not commit
    fn discard(&mut self, ops: &[PendingOp]) {
        for op in ops {
            if let PendingOp::Attach(key) = *op {
                self.hooks.remove(key);
            }
        }
    }
}
