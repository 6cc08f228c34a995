//! Code patching backend used by hook transactions
//!
//! A [`CodePatcher`] turns a (target, replacement) pair into a
//! [`PreparedPatch`] ahead of time, then writes or reverts it while every
//! other thread is frozen. Preparing allocates and may log; writing must not.

use super::error::HookError;

/// A fully computed redirection, ready to be written or reverted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPatch {
    /// Entry address being redirected
    pub target: usize,

    /// Function that receives control instead
    pub replacement: usize,

    /// Address that behaves like the unpatched target
    pub call_through: usize,

    /// Jump stub to `replacement` that the patch bytes branch to
    pub relay: usize,

    /// Length of the relay stub
    pub relay_len: usize,

    /// Bytes at `target` before patching
    pub original_bytes: Vec<u8>,

    /// Bytes at `target` while patched (same length as `original_bytes`)
    pub patch_bytes: Vec<u8>,

    /// Instruction boundaries: (address in the original code, address of
    /// its relocated copy). The last entry maps the first byte after the
    /// stolen range to the jump back.
    pub ip_map: Vec<(usize, usize)>,
}

impl PreparedPatch {
    /// Number of bytes overwritten at the target
    pub fn len(&self) -> usize {
        self.original_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original_bytes.is_empty()
    }

    /// Check if `ip` lies inside the overwritten range
    pub fn covers(&self, ip: usize) -> bool {
        ip >= self.target && ip < self.target + self.len()
    }

    /// Where a thread frozen at `ip` must resume once this patch is written
    ///
    /// Installing moves threads out of the bytes about to be overwritten and
    /// into the relocated copy. Removing moves threads out of the relay and
    /// the relocated copy back into the original code. Returns `None` when
    /// the thread can stay where it is.
    pub fn relocate_ip(&self, ip: usize, installing: bool) -> Option<usize> {
        if installing {
            if !self.covers(ip) {
                return None;
            }
            return self
                .ip_map
                .iter()
                .find(|(original, _)| *original == ip)
                .map(|(_, relocated)| *relocated);
        }

        if ip >= self.relay && ip < self.relay + self.relay_len {
            return Some(self.target);
        }
        self.ip_map
            .iter()
            .find(|(_, relocated)| *relocated == ip)
            .map(|(original, _)| *original)
    }
}

/// Backend that prepares and writes code redirections
pub trait CodePatcher {
    /// Token for threads suspended by [`CodePatcher::freeze`]
    type Frozen;

    /// Compute the redirection of `target` to `replacement`
    ///
    /// # Safety
    /// `target` must be the entry of a function mapped in this process and
    /// `replacement` a function with a compatible signature.
    unsafe fn prepare(&mut self, target: usize, replacement: usize)
        -> Result<PreparedPatch, HookError>;

    /// Suspend every other thread of the process
    fn freeze(&mut self) -> Result<Self::Frozen, HookError>;

    /// Write `patch_bytes` (install) or `original_bytes` (remove)
    ///
    /// Called only between `freeze` and `thaw`; must not allocate.
    ///
    /// # Safety
    /// `patch` must have been produced by `prepare` on this patcher.
    unsafe fn write(&mut self, patch: &PreparedPatch, install: bool) -> Result<(), HookError>;

    /// Fix up suspended threads for the writes in `applied`, then resume them
    fn thaw(&mut self, frozen: Self::Frozen, applied: &[(&PreparedPatch, bool)]);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) const FAKE_CODE_LEN: usize = 8;
    pub(crate) const CALL_THROUGH_OFFSET: usize = 0x1000_0000;

    /// In-memory patcher over a fake address space
    #[derive(Default)]
    pub(crate) struct MemoryPatcher {
        pub memory: HashMap<usize, Vec<u8>>,
        pub fail_write_at: Option<usize>,
        pub freezes: usize,
        pub thawed_with: Vec<Vec<(usize, bool)>>,
        pub frozen: bool,
    }

    impl MemoryPatcher {
        pub fn with_functions(targets: &[usize]) -> Self {
            let mut patcher = Self::default();
            for &target in targets {
                patcher.memory.insert(target, original_code(target));
            }
            patcher
        }

        pub fn bytes(&self, target: usize) -> &[u8] {
            &self.memory[&target]
        }
    }

    pub(crate) fn original_code(target: usize) -> Vec<u8> {
        (0..FAKE_CODE_LEN).map(|i| (target as u8).wrapping_add(i as u8)).collect()
    }

    impl CodePatcher for MemoryPatcher {
        type Frozen = ();

        unsafe fn prepare(
            &mut self,
            target: usize,
            replacement: usize,
        ) -> Result<PreparedPatch, HookError> {
            let original_bytes = self
                .memory
                .get(&target)
                .cloned()
                .ok_or(HookError::InvalidAddress(target))?;
            let mut patch_bytes = vec![0xE9; 1];
            patch_bytes.extend_from_slice(&(replacement as u32).to_le_bytes());
            patch_bytes.resize(original_bytes.len(), 0x90);

            let call_through = target + CALL_THROUGH_OFFSET;
            Ok(PreparedPatch {
                target,
                replacement,
                call_through,
                relay: call_through + 0x100,
                relay_len: 14,
                original_bytes,
                patch_bytes,
                ip_map: vec![(target, call_through), (target + FAKE_CODE_LEN, call_through + 16)],
            })
        }

        fn freeze(&mut self) -> Result<(), HookError> {
            assert!(!self.frozen, "nested freeze");
            self.freezes += 1;
            self.frozen = true;
            Ok(())
        }

        unsafe fn write(&mut self, patch: &PreparedPatch, install: bool) -> Result<(), HookError> {
            assert!(self.frozen, "write outside freeze");
            if self.fail_write_at == Some(patch.target) {
                return Err(HookError::ProtectFailed(patch.target));
            }
            let bytes = if install {
                &patch.patch_bytes
            } else {
                &patch.original_bytes
            };
            let slot = self
                .memory
                .get_mut(&patch.target)
                .ok_or(HookError::InvalidAddress(patch.target))?;
            slot.copy_from_slice(bytes);
            Ok(())
        }

        fn thaw(&mut self, _frozen: (), applied: &[(&PreparedPatch, bool)]) {
            self.frozen = false;
            self.thawed_with
                .push(applied.iter().map(|(p, install)| (p.target, *install)).collect());
        }
    }

    fn sample_patch() -> PreparedPatch {
        PreparedPatch {
            target: 0x1000,
            replacement: 0x9000,
            call_through: 0x5010,
            relay: 0x5000,
            relay_len: 14,
            original_bytes: vec![0; 7],
            patch_bytes: vec![0xE9, 0, 0, 0, 0, 0x90, 0x90],
            // push rbp (1) / mov rbp,rsp (3) / sub rsp,0x20 (3 -> 4 relocated)
            ip_map: vec![
                (0x1000, 0x5010),
                (0x1001, 0x5011),
                (0x1004, 0x5014),
                (0x1007, 0x5018),
            ],
        }
    }

    #[test]
    fn test_relocate_into_copy_on_install() {
        let patch = sample_patch();
        assert_eq!(patch.relocate_ip(0x1000, true), Some(0x5010));
        assert_eq!(patch.relocate_ip(0x1004, true), Some(0x5014));
        // First byte after the stolen range is untouched by the patch
        assert_eq!(patch.relocate_ip(0x1007, true), None);
        assert_eq!(patch.relocate_ip(0x2000, true), None);
    }

    #[test]
    fn test_relocate_back_on_remove() {
        let patch = sample_patch();
        assert_eq!(patch.relocate_ip(0x5000, false), Some(0x1000));
        assert_eq!(patch.relocate_ip(0x500d, false), Some(0x1000));
        assert_eq!(patch.relocate_ip(0x5011, false), Some(0x1001));
        assert_eq!(patch.relocate_ip(0x5018, false), Some(0x1007));
        assert_eq!(patch.relocate_ip(0x1002, false), None);
    }

    #[test]
    fn test_covers() {
        let patch = sample_patch();
        assert!(patch.covers(0x1000));
        assert!(patch.covers(0x1006));
        assert!(!patch.covers(0x1007));
        assert_eq!(patch.len(), 7);
    }
}
