//! C4: architecture-specific register marshalling, including x87
//! extended-precision conversion and the symbolic-register tracking set
//! (spec.md §4.5).

use crate::arch::{ArchCapabilities, X87_FC3210, X87_FPROUND, X87_FTOP, X87_REGISTERS, X87_TAGS};
use crate::classify::{classify, Classification};
use crate::constants::{MSR_FS_BASE, MSR_GS_BASE, MSR_TRAMPOLINE_BASE, PAGE_SIZE};
use crate::error::AcceleratorError;
use crate::handle::EmulatorHandle;
use crate::plugin::AcceleratorPlugin;
use state_api::{Architecture, Permission, SymbolicState, SymbolicValue};
use std::collections::HashSet;

/// Byte contents of registers the tracking scan found symbolic, saved
/// before egress overwrites them from the emulator and restored after
/// (spec.md §4.5 "After stop...").
pub struct SavedSymbolicRegisters<V> {
    entries: Vec<(usize, V)>,
}

/// C4 ingress (spec.md §4.5 "Ingress"): pushes every non-blacklisted
/// register through C2, then the architecture-specific extras (x87, MSR
/// bases, GDT synthesis).
pub fn push_registers<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &mut EmulatorHandle,
    ip: u64,
) -> Result<(), AcceleratorError> {
    let arch = ArchCapabilities::for_architecture(handle.architecture);
    let sym_regs_support = state.options().sym_regs_support;

    for &name in arch.general_purpose_registers() {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let value = state.registers().load(offset, size);
        let classified = match classify(plugin, state, ip, &value) {
            Classification::Refuse => {
                return Err(AcceleratorError::SymbolicInputRefused { register: name })
            }
            Classification::Value(v) => v,
        };
        if classified.is_symbolic() && !sym_regs_support {
            return Err(AcceleratorError::SymbolicInputRefused { register: name });
        }
        let bytes = classified.concrete_bytes().unwrap_or_else(|| vec![0u8; size]);
        handle.engine.reg_write(offset, &bytes);
    }

    push_x87(plugin, state, handle, ip)?;

    if arch.writes_msr_bases {
        write_msr_base(plugin, state, handle, ip, "fs_base", MSR_FS_BASE)?;
        write_msr_base(plugin, state, handle, ip, "gs_base", MSR_GS_BASE)?;
    }
    if arch.synthesizes_gdt {
        synthesize_gdt(handle);
    }

    Ok(())
}

/// C4 egress (spec.md §4.5 "Egress"): reads every non-blacklisted register
/// back from the emulator into the symbolic state. On the x86 family, also
/// backs up the pre-syscall-instruction address under the separate
/// `ip_at_syscall` register rather than touching the real `ip`/`rip` offset
/// (spec.md §4.5: "Fix up ip_at_syscall on x86 family when the jump kind is
/// a syscall (subtract 2 from ip)" — the emulator-observed `ip`/`rip` is left
/// exactly as read back, only `ip_at_syscall` gets the backed-up value).
pub fn pull_registers<S: SymbolicState>(state: &mut S, handle: &EmulatorHandle, syscall: bool) {
    let arch = ArchCapabilities::for_architecture(handle.architecture);

    for &name in arch.general_purpose_registers() {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let bytes = handle.engine.reg_read(offset, size);
        state.registers_mut().store_bytes(offset, &bytes);
    }

    pull_x87(state, handle);

    if syscall && matches!(handle.architecture, Architecture::X86 | Architecture::Amd64) {
        if let Some((ip_offset, ip_size)) =
            state.registers().register_offset(ip_register_name(handle.architecture))
        {
            if let Some((syscall_offset, syscall_size)) =
                state.registers().register_offset("ip_at_syscall")
            {
                let bytes = handle.engine.reg_read(ip_offset, ip_size);
                let ip = bytes_to_u64(&bytes);
                let fixed = ip.wrapping_sub(2);
                state
                    .registers_mut()
                    .store_bytes(syscall_offset, &fixed.to_le_bytes()[..syscall_size]);
            }
        }
    }
}

fn ip_register_name(arch: Architecture) -> &'static str {
    match arch {
        Architecture::X86 => "eip",
        Architecture::Amd64 => "rip",
        Architecture::Mips32 => "pc",
    }
}

fn bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
    u64::from_le_bytes(buf)
}

/// Arms the native side with the byte-granular symbolic-offset set (spec.md
/// §4.5 steps 1–2), provided the quick scan finds nothing outright refused.
/// Returns `Ok(None)` when nothing is symbolic — the fast-path optimization
/// named in spec.md §4.7 ("`_check_registers` fast-path").
pub fn compute_symbolic_offsets<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    ip: u64,
    arch: ArchCapabilities,
) -> Result<Option<Vec<u64>>, AcceleratorError> {
    for &name in arch.general_purpose_registers() {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let value = state.registers().load(offset, size);
        if classify(plugin, state, ip, &value).is_refused() {
            return Err(AcceleratorError::SymbolicInputRefused { register: name });
        }
    }

    let highest = state.registers().highest_offset();
    let mut offsets: HashSet<u64> = HashSet::new();
    for offset in 0..highest {
        if state.registers().load(offset, 1).is_symbolic() {
            offsets.insert(offset as u64);
        }
    }
    if offsets.is_empty() {
        return Ok(None);
    }

    if let Some((lo, hi)) = arch.flags_region {
        if offsets.iter().any(|&o| (o as usize) >= lo && (o as usize) < hi) {
            offsets.extend((lo as u64)..(hi as u64));
        }
    }

    let mut offsets: Vec<u64> = offsets.into_iter().collect();
    offsets.sort_unstable();
    Ok(Some(offsets))
}

/// Saves the contents of every offset the native side reported symbolic,
/// before egress overwrites them from the (necessarily concrete) emulator
/// registers; restored via [`restore_symbolic_registers`] afterward.
pub fn save_symbolic_registers<S: SymbolicState>(
    state: &S,
    offsets: &[u64],
) -> SavedSymbolicRegisters<S::Value> {
    let entries = offsets
        .iter()
        .map(|&offset| (offset as usize, state.registers().load(offset as usize, 1)))
        .collect();
    SavedSymbolicRegisters { entries }
}

pub fn restore_symbolic_registers<S: SymbolicState>(
    state: &mut S,
    saved: SavedSymbolicRegisters<S::Value>,
) {
    for (offset, value) in saved.entries {
        state.registers_mut().store(offset, 1, &value);
    }
}

fn write_msr_base<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &mut EmulatorHandle,
    ip: u64,
    register: &'static str,
    msr: u32,
) -> Result<(), AcceleratorError> {
    let Some((offset, size)) = state.registers().register_offset(register) else {
        return Ok(());
    };
    let value = state.registers().load(offset, size);
    let classified = match classify(plugin, state, ip, &value) {
        Classification::Refuse => {
            return Err(AcceleratorError::SymbolicInputRefused { register })
        }
        Classification::Value(v) => v,
    };
    let bytes = classified.concrete_bytes().unwrap_or_else(|| vec![0u8; size]);
    let base = bytes_to_u64(&bytes);
    write_msr_trampoline(handle, msr, base);
    Ok(())
}

/// Assembles `mov ecx, msr; mov eax, lo; mov edx, hi; wrmsr` into the
/// scratch page and runs it for exactly one instruction's worth of steps
/// (spec.md §4.5: "a tiny piece of code assembled into a scratch page").
fn write_msr_trampoline(handle: &mut EmulatorHandle, msr: u32, value: u64) {
    let mut code = Vec::with_capacity(13);
    code.push(0xB9); // mov ecx, imm32
    code.extend_from_slice(&msr.to_le_bytes());
    code.push(0xB8); // mov eax, imm32
    code.extend_from_slice(&(value as u32).to_le_bytes());
    code.push(0xBA); // mov edx, imm32
    code.extend_from_slice(&((value >> 32) as u32).to_le_bytes());
    code.extend_from_slice(&[0x0F, 0x30]); // wrmsr

    handle
        .engine
        .mem_map(MSR_TRAMPOLINE_BASE, PAGE_SIZE, (Permission::READ | Permission::EXEC).bits());
    handle.engine.mem_write(MSR_TRAMPOLINE_BASE, &code);
    handle.track_mapped(MSR_TRAMPOLINE_BASE, PAGE_SIZE);
    let _ = handle.native.start(MSR_TRAMPOLINE_BASE, 1);
}

/// Synthesizes a flat code/data GDT in the reserved fake-descriptor-table
/// region (spec.md §4.5, §4.7: `[0x1000, 0x2000)`).
fn synthesize_gdt(handle: &mut EmulatorHandle) {
    use crate::constants::{FAKE_GDT_END, FAKE_GDT_START};

    let len = FAKE_GDT_END - FAKE_GDT_START;
    let mut table = vec![0u8; len as usize];
    write_flat_descriptor(&mut table, 1, 0x9A); // flat code segment
    write_flat_descriptor(&mut table, 2, 0x92); // flat data segment

    handle
        .engine
        .mem_map(FAKE_GDT_START, len, (Permission::READ | Permission::WRITE).bits());
    handle.engine.mem_write(FAKE_GDT_START, &table);
    handle.track_mapped(FAKE_GDT_START, len);
}

fn write_flat_descriptor(table: &mut [u8], index: usize, access: u8) {
    let base = index * 8;
    table[base] = 0xFF;
    table[base + 1] = 0xFF;
    table[base + 2] = 0x00;
    table[base + 3] = 0x00;
    table[base + 4] = 0x00;
    table[base + 5] = access;
    table[base + 6] = 0xCF;
    table[base + 7] = 0x00;
}

fn push_x87<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &mut EmulatorHandle,
    ip: u64,
) -> Result<(), AcceleratorError> {
    for (slot, &name) in X87_REGISTERS.iter().enumerate() {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let value = state.registers().load(offset, size);
        let classified = match classify(plugin, state, ip, &value) {
            Classification::Refuse => {
                return Err(AcceleratorError::SymbolicInputRefused { register: name })
            }
            Classification::Value(v) => v,
        };
        let bytes = classified.concrete_bytes().unwrap_or_else(|| vec![0u8; 8]);
        let double = f64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8]));
        let extended = double_to_extended(double);
        handle.engine.reg_write(x87_native_offset(slot), &extended);
    }

    // FPTAG/FPCW/FPSW pack straight through (spec.md §4.5: "one FPTAG
    // bit-pair per slot ... one FPCW with rounding mode ... one FPSW with
    // top and c3210") — no float conversion needed for these, only the
    // eight stack slots above get the extended-precision treatment.
    for name in X87_TAGS.iter().copied().chain([X87_FC3210, X87_FTOP, X87_FPROUND]) {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let value = state.registers().load(offset, size);
        let classified = match classify(plugin, state, ip, &value) {
            Classification::Refuse => {
                return Err(AcceleratorError::SymbolicInputRefused { register: name })
            }
            Classification::Value(v) => v,
        };
        let bytes = classified.concrete_bytes().unwrap_or_else(|| vec![0u8; size]);
        handle.engine.reg_write(offset, &bytes);
    }

    Ok(())
}

fn pull_x87<S: SymbolicState>(state: &mut S, handle: &EmulatorHandle) {
    for (slot, &name) in X87_REGISTERS.iter().enumerate() {
        let Some((offset, _)) = state.registers().register_offset(name) else {
            continue;
        };
        let ext = handle.engine.reg_read(x87_native_offset(slot), 10);
        let mut buf = [0u8; 10];
        buf.copy_from_slice(&ext[..10.min(ext.len())]);
        let double = extended_to_double(&buf);
        state.registers_mut().store_bytes(offset, &double.to_le_bytes());
    }

    for name in X87_TAGS.iter().copied().chain([X87_FC3210, X87_FTOP, X87_FPROUND]) {
        let Some((offset, size)) = state.registers().register_offset(name) else {
            continue;
        };
        let bytes = handle.engine.reg_read(offset, size);
        state.registers_mut().store_bytes(offset, &bytes);
    }
}

/// Offset of x87 stack slot `slot` within the native engine's 80-bit
/// extended register file, a separate address space from both guest
/// memory and the general-purpose register offsets above.
fn x87_native_offset(slot: usize) -> usize {
    slot * 10
}

/// Double → 80-bit extended conversion (spec.md §4.5): sign, biased
/// exponent, and 52-bit mantissa extracted from the double; zero stays
/// zero, NaN/Inf get the 80-bit exponent `0x7FFF` with the explicit
/// integer bit set, everything else is rebiased `exp - 1023 + 16383` with
/// the mantissa shifted left 11 and the explicit integer bit set.
pub fn double_to_extended(d: f64) -> [u8; 10] {
    let bits = d.to_bits();
    let sign = (bits >> 63) & 1;
    let biased_exp = ((bits >> 52) & 0x7FF) as u32;
    let mantissa52 = bits & 0x000F_FFFF_FFFF_FFFF;

    let (ext_exp, ext_mantissa): (u32, u64) = if biased_exp == 0 {
        (0, 0)
    } else if biased_exp == 0x7FF {
        (0x7FFF, (mantissa52 << 11) | (1u64 << 63))
    } else {
        let exp = biased_exp - 1023 + 16383;
        (exp, (mantissa52 << 11) | (1u64 << 63))
    };

    let mut out = [0u8; 10];
    out[0..8].copy_from_slice(&ext_mantissa.to_le_bytes());
    let se = ((sign as u16) << 15) | (ext_exp as u16 & 0x7FFF);
    out[8..10].copy_from_slice(&se.to_le_bytes());
    out
}

/// Reverse of [`double_to_extended`], with underflow (exponent below the
/// double's range) clamped to zero and overflow clamped to infinity
/// (spec.md §4.5 "Egress").
pub fn extended_to_double(ext: &[u8; 10]) -> f64 {
    let mantissa = u64::from_le_bytes(ext[0..8].try_into().unwrap());
    let se = u16::from_le_bytes(ext[8..10].try_into().unwrap());
    let sign = (se >> 15) as u64;
    let exp = (se & 0x7FFF) as u32;

    let (biased_exp, mantissa52): (u64, u64) = if exp == 0 {
        (0, 0)
    } else if exp == 0x7FFF {
        (0x7FF, (mantissa << 1) >> 12)
    } else {
        let rebiased = exp as i64 - 16383 + 1023;
        if rebiased <= 0 {
            (0, 0)
        } else if rebiased >= 0x7FF {
            (0x7FF, 0)
        } else {
            (rebiased as u64, (mantissa << 1) >> 12)
        }
    };

    f64::from_bits((sign << 63) | (biased_exp << 52) | mantissa52)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: f64) {
        let ext = double_to_extended(value);
        let back = extended_to_double(&ext);
        assert_eq!(value.to_bits(), back.to_bits(), "roundtrip of {value}");
    }

    #[test]
    fn x87_roundtrip_preserves_ordinary_values() {
        roundtrip(0.0);
        roundtrip(1.0);
        roundtrip(-1.0);
        roundtrip(3.1415926535);
        roundtrip(-2.5);
        roundtrip(1.0 / 3.0);
    }

    #[test]
    fn x87_roundtrip_preserves_negative_zero_sign() {
        let ext = double_to_extended(-0.0);
        let back = extended_to_double(&ext);
        assert!(back.is_sign_negative());
        assert_eq!(back, 0.0);
    }

    #[test]
    fn x87_roundtrip_preserves_infinity() {
        roundtrip(f64::INFINITY);
        roundtrip(f64::NEG_INFINITY);
    }

    #[test]
    fn x87_roundtrip_preserves_nan_payload_bits() {
        let ext = double_to_extended(f64::NAN);
        let back = extended_to_double(&ext);
        assert!(back.is_nan());
    }

    #[test]
    fn x87_extended_sets_the_explicit_integer_bit() {
        let ext = double_to_extended(1.0);
        // Byte 7 holds bits 56..63 of the 64-bit mantissa field; the explicit
        // integer bit is bit 63, i.e. the top bit of byte 7.
        assert_eq!(ext[7] & 0x80, 0x80);
    }
}
