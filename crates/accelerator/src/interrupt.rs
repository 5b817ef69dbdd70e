//! C5: the interrupt/syscall bridge (spec.md §4.4).

use crate::arch::{ArchCapabilities, InterruptOutcome};
use crate::handle::EmulatorHandle;
use crate::plugin::AcceleratorPlugin;
use native_emu_sys::StopReason;
use state_api::{SymbolicState, SymbolicValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptResult {
    Stop(StopReason),
    /// The i386 quick-syscall hook ran in place; execution continues
    /// without surfacing a stop to the symbolic executor.
    Resumed,
}

/// Hooked on `UC_HOOK_INTR` equivalent for every architecture (spec.md
/// §4.4). Queries `is_interrupt_handled` first so interrupts already
/// consumed by native code aren't double-handled.
pub fn handle_interrupt<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &EmulatorHandle,
    vector: u32,
    interrupted_pc: u64,
) -> InterruptResult {
    if handle.native.is_interrupt_handled() {
        return InterruptResult::Resumed;
    }

    let arch = ArchCapabilities::for_architecture(handle.architecture);
    match arch.classify_interrupt(vector) {
        InterruptOutcome::ZeroDiv => InterruptResult::Stop(StopReason::ZeroDiv),
        InterruptOutcome::Syscall { pc_adjust } => {
            dispatch_syscall(plugin, state, arch, interrupted_pc + pc_adjust)
        }
        InterruptOutcome::Unhandled => {
            tracing::warn!(vector, "unhandled interrupt vector, stopping episode");
            InterruptResult::Stop(StopReason::Error)
        }
    }
}

/// Hooked on the dedicated SYSCALL-instruction hook on AMD64 (spec.md
/// §4.4: "SYSCALL instruction on 64-bit: treat as syscall"), which unicorn
/// surfaces separately from the interrupt vector table.
pub fn handle_syscall_instruction<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &EmulatorHandle,
    interrupted_pc: u64,
) -> InterruptResult {
    let arch = ArchCapabilities::for_architecture(handle.architecture);
    let pc_adjust = match arch.syscall_insn_outcome() {
        InterruptOutcome::Syscall { pc_adjust } => pc_adjust,
        _ => 2,
    };
    dispatch_syscall(plugin, state, arch, interrupted_pc + pc_adjust)
}

/// The i386 quick-syscall path (`_quick_syscall` in the original): if an
/// in-accelerator hook is registered for the syscall number in `eax`, run
/// it directly against the symbolic state and resume without stopping.
/// Otherwise surface a `SYSCALL` stop for the symbolic executor to model.
fn dispatch_syscall<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    arch: ArchCapabilities,
    _syscall_pc: u64,
) -> InterruptResult {
    if arch.supports_quick_syscall_hook {
        if let Some(sysno) = read_concrete_syscall_number(state) {
            if let Some(hook) = plugin.syscall_hooks.get(&sysno).cloned() {
                hook(state);
                return InterruptResult::Resumed;
            }
        }
    }
    InterruptResult::Stop(StopReason::Syscall)
}

fn read_concrete_syscall_number<S: SymbolicState>(state: &S) -> Option<u64> {
    let (offset, size) = state.registers().register_offset("eax")?;
    let value = state.registers().load(offset, size);
    let bytes = value.concrete_bytes()?;
    let mut buf = [0u8; 8];
    buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
    Some(u64::from_le_bytes(buf))
}
