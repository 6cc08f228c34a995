//! Inline function hooks for x86 and x86-64
//!
//! The first instructions of the target are decoded with iced-x86 until at
//! least five bytes are covered, then re-encoded into a trampoline block
//! allocated within rel32 range of the target:
//!
//! ```text
//! trampoline: relay:   jmp replacement
//!             copy:    <relocated prologue>
//!                      jmp target + stolen
//! target:     jmp relay ; nop padding over the rest of the stolen bytes
//! ```
//!
//! `copy` is the call-through address handed back to the hook owner.

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};

use super::error::HookError;
use super::freeze::{freeze_threads, thaw_threads, FrozenThreads};
use super::patcher::{CodePatcher, PreparedPatch};
use super::trampoline::{alloc_trampoline, within_rel32, TRAMPOLINE_SIZE};

#[cfg(target_pointer_width = "64")]
const BITNESS: u32 = 64;
#[cfg(target_pointer_width = "32")]
const BITNESS: u32 = 32;

#[cfg(target_pointer_width = "64")]
const JMP_BACK: Code = Code::Jmp_rel32_64;
#[cfg(target_pointer_width = "32")]
const JMP_BACK: Code = Code::Jmp_rel32_32;

/// Size of `jmp rel32`
const JMP_LEN: usize = 5;

/// Bytes read from the target; covers five bytes plus one maximal instruction
const MAX_READ: usize = JMP_LEN + 15;

/// Patcher that rewrites function entries in place
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePatcher;

impl CodePatcher for InlinePatcher {
    type Frozen = FrozenThreads;

    unsafe fn prepare(
        &mut self,
        target: usize,
        replacement: usize,
    ) -> Result<PreparedPatch, HookError> {
        if target == 0 {
            return Err(HookError::InvalidAddress(target));
        }
        if replacement == 0 {
            return Err(HookError::InvalidAddress(replacement));
        }

        let code = read_code(target)?;
        let instructions = steal(&code, target)?;
        let stolen: usize = instructions.iter().map(|i| i.len()).sum();

        let block = alloc_trampoline(target).ok_or(HookError::TrampolineAlloc(target))?;
        let base = block.as_ptr() as usize;
        if !within_rel32(target + JMP_LEN, base) {
            return Err(HookError::TrampolineAlloc(target));
        }

        let relay = relay_stub(base, replacement);
        let call_through = base + relay.len();
        let (copy, ip_map) = relocate(&instructions, target + stolen, call_through)?;
        if relay.len() + copy.len() > TRAMPOLINE_SIZE {
            return Err(HookError::RelocationFailed(format!(
                "relocated prologue of {:#x} needs {} bytes",
                target,
                relay.len() + copy.len()
            )));
        }

        // SAFETY: block is a fresh RWX allocation of TRAMPOLINE_SIZE bytes
        std::ptr::copy_nonoverlapping(relay.as_ptr(), base as *mut u8, relay.len());
        std::ptr::copy_nonoverlapping(copy.as_ptr(), call_through as *mut u8, copy.len());
        flush_instruction_cache(base, relay.len() + copy.len());

        Ok(PreparedPatch {
            target,
            replacement,
            call_through,
            relay: base,
            relay_len: relay.len(),
            original_bytes: code[..stolen].to_vec(),
            patch_bytes: entry_jump(target, base, stolen),
            ip_map,
        })
    }

    fn freeze(&mut self) -> Result<FrozenThreads, HookError> {
        freeze_threads()
    }

    unsafe fn write(&mut self, patch: &PreparedPatch, install: bool) -> Result<(), HookError> {
        let bytes = if install {
            &patch.patch_bytes
        } else {
            &patch.original_bytes
        };
        write_code(patch.target, bytes)
    }

    fn thaw(&mut self, frozen: FrozenThreads, applied: &[(&PreparedPatch, bool)]) {
        thaw_threads(frozen, applied);
    }
}

/// Decode whole instructions from the start of `code` until `JMP_LEN` bytes are covered
fn steal(code: &[u8], ip: usize) -> Result<Vec<Instruction>, HookError> {
    let mut decoder = Decoder::with_ip(BITNESS, code, ip as u64, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut stolen = 0;

    while stolen < JMP_LEN {
        if !decoder.can_decode() {
            return Err(HookError::TooShort(ip));
        }
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::RelocationFailed(format!(
                "invalid instruction at {:#x}",
                instruction.ip()
            )));
        }
        stolen += instruction.len();
        instructions.push(instruction);

        // The function ends before there is room for the jump
        let terminal = matches!(
            instruction.flow_control(),
            FlowControl::Return
                | FlowControl::UnconditionalBranch
                | FlowControl::IndirectBranch
                | FlowControl::Interrupt
                | FlowControl::Exception
        );
        if terminal && stolen < JMP_LEN {
            return Err(HookError::TooShort(ip));
        }
    }

    Ok(instructions)
}

/// Re-encode `instructions` at `code_base`, followed by a jump to `resume`
///
/// Returns the code and the (original, relocated) address of each
/// instruction boundary, ending with `resume` itself.
fn relocate(
    instructions: &[Instruction],
    resume: usize,
    code_base: usize,
) -> Result<(Vec<u8>, Vec<(usize, usize)>), HookError> {
    let mut block = instructions.to_vec();
    let jump_back = Instruction::with_branch(JMP_BACK, resume as u64)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;
    block.push(jump_back);

    let encoded = BlockEncoder::encode(
        BITNESS,
        InstructionBlock::new(&block, code_base as u64),
        BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS,
    )
    .map_err(|e| HookError::RelocationFailed(e.to_string()))?;

    let mut ip_map = Vec::with_capacity(block.len());
    for (instruction, &offset) in instructions.iter().zip(&encoded.new_instruction_offsets) {
        ip_map.push((instruction.ip() as usize, code_base + offset as usize));
    }
    if let Some(&offset) = encoded.new_instruction_offsets.last() {
        ip_map.push((resume, code_base + offset as usize));
    }

    Ok((encoded.code_buffer, ip_map))
}

/// Jump from the trampoline to the replacement
fn relay_stub(at: usize, replacement: usize) -> Vec<u8> {
    if BITNESS == 64 {
        // jmp qword ptr [rip+0] ; dq replacement
        let mut stub = vec![0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];
        stub.extend_from_slice(&(replacement as u64).to_le_bytes());
        stub
    } else {
        let rel = (replacement as u32).wrapping_sub(at as u32 + JMP_LEN as u32);
        let mut stub = vec![0xE9];
        stub.extend_from_slice(&rel.to_le_bytes());
        stub
    }
}

/// `jmp rel32` from the target to the relay, padded to the stolen length
fn entry_jump(target: usize, relay: usize, stolen: usize) -> Vec<u8> {
    let rel = (relay as i64 - (target + JMP_LEN) as i64) as i32;
    let mut bytes = Vec::with_capacity(stolen);
    bytes.push(0xE9);
    bytes.extend_from_slice(&rel.to_le_bytes());
    bytes.resize(stolen, 0x90);
    bytes
}

/// Copy up to `MAX_READ` readable bytes from `address`
unsafe fn read_code(address: usize) -> Result<Vec<u8>, HookError> {
    let readable = |at: usize| -> Option<usize> {
        let region = region::query(at as *const u8).ok()?;
        if !region.protection().contains(region::Protection::READ) {
            return None;
        }
        Some(region.as_range().end)
    };

    let mut end = readable(address).ok_or(HookError::InvalidAddress(address))?;
    if end - address < MAX_READ {
        if let Some(next_end) = readable(end) {
            end = next_end;
        }
    }

    let len = (end - address).min(MAX_READ);
    let mut code = vec![0u8; len];
    // SAFETY: [address, address + len) was reported readable
    std::ptr::copy_nonoverlapping(address as *const u8, code.as_mut_ptr(), len);
    Ok(code)
}

#[cfg(windows)]
unsafe fn write_code(address: usize, bytes: &[u8]) -> Result<(), HookError> {
    use std::ffi::c_void;
    use windows::Win32::System::Memory::{
        VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
    };

    let mut old = PAGE_PROTECTION_FLAGS(0);
    VirtualProtect(
        address as *const c_void,
        bytes.len(),
        PAGE_EXECUTE_READWRITE,
        &mut old,
    )
    .map_err(|_| HookError::ProtectFailed(address))?;

    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());

    let mut ignored = PAGE_PROTECTION_FLAGS(0);
    let _ = VirtualProtect(address as *const c_void, bytes.len(), old, &mut ignored);
    flush_instruction_cache(address, bytes.len());
    Ok(())
}

#[cfg(not(windows))]
unsafe fn write_code(address: usize, bytes: &[u8]) -> Result<(), HookError> {
    let _guard = region::protect_with_handle(
        address as *const u8,
        bytes.len(),
        region::Protection::READ_WRITE_EXECUTE,
    )
    .map_err(|_| HookError::ProtectFailed(address))?;

    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    Ok(())
}

#[cfg(windows)]
fn flush_instruction_cache(address: usize, len: usize) {
    use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows::Win32::System::Threading::GetCurrentProcess;

    // SAFETY: flushing a range of our own process
    unsafe {
        let _ = FlushInstructionCache(
            GetCurrentProcess(),
            Some(address as *const std::ffi::c_void),
            len,
        );
    }
}

#[cfg(not(windows))]
fn flush_instruction_cache(_address: usize, _len: usize) {}
