//! C3: the lazy page-fault handler (spec.md §4.3). Triggered by the native
//! emulator whenever execution or a data access hits an unmapped page.

use crate::classify::{classify, Classification};
use crate::constants::{PAGE_SIZE, WIDE_ALIGNMENT};
use crate::handle::EmulatorHandle;
use crate::plugin::AcceleratorPlugin;
use native_emu_sys::StopReason;
use state_api::{PagePermission, Permission, SymbolicState, SymbolicValue};
use std::collections::HashSet;

/// Reports whether `[address, address+size)` overflows the true bit width of
/// `addr_bits` (spec.md §4.3's zero-page guard: "wraps past the top of the
/// address space"). 32-bit architectures (X86, MIPS32) wrap at 2^32, not at
/// `u64::MAX`.
fn overflows_address_space(address: u64, size: u64, addr_bits: u32) -> bool {
    if addr_bits >= 64 {
        return address.checked_add(size).is_none();
    }
    match address.checked_add(size) {
        None => true,
        Some(end) => (end >> addr_bits) != 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultOutcome {
    Installed,
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageBridgeError {
    ZeroPageGuard,
    AccessingZeroPage,
    FetchingZeroPage,
    MixedPermissions,
    Segfault,
}

fn stop_reason_for(err: PageBridgeError) -> StopReason {
    match err {
        PageBridgeError::ZeroPageGuard => StopReason::ZeroPage,
        PageBridgeError::AccessingZeroPage => StopReason::Segfault,
        PageBridgeError::FetchingZeroPage => StopReason::ExecNone,
        PageBridgeError::Segfault => StopReason::Segfault,
        // Exhausted the narrow retry with permissions still mixed; there is
        // no dedicated stop code for this case (spec.md §4.3, §7 — mixed
        // permissions is meant to be absorbed by the wide->narrow retry),
        // so it surfaces as a generic error stop.
        PageBridgeError::MixedPermissions => StopReason::Error,
    }
}

/// Aligns `[address, address+size)` outward to `alignment`, reporting
/// whether the range wraps past the top of the `addr_bits`-wide address
/// space (spec.md §4.3's zero-page guard condition).
fn align_range(address: u64, size: u64, alignment: u64, addr_bits: u32) -> (u64, u64, bool) {
    let mask = alignment - 1;
    let start = address & !mask;
    let wraps = overflows_address_space(address, size, addr_bits);
    let raw_end = address.saturating_add(size);
    let end = raw_end.saturating_add(mask) & !mask;
    (start, end.max(start + alignment), wraps)
}

fn taint_range(taint: &mut [u8], base: u64, addr: u64, len: u64) {
    let from = (addr - base) as usize;
    let to = from + len as usize;
    for byte in &mut taint[from..to] {
        *byte = 1;
    }
}

/// Fills `[gap_start, gap_end)` with zeros (if `cgc_zero_fill` is set, i.e.
/// leaves `content` untouched) or taints it otherwise — used for ranges with
/// no stored memory object at all, as opposed to a stored-but-symbolic one.
fn fill_gap(taint: &mut [u8], base: u64, gap_start: u64, gap_end: u64, cgc_zero_fill: bool) {
    if cgc_zero_fill || gap_end <= gap_start {
        return;
    }
    taint_range(taint, base, gap_start, gap_end - gap_start);
}

/// Top-level entry point: tries the wide alignment first, then the narrow
/// one exactly once on failure (spec.md §4.3 "Error recovery"). A zero-page
/// guard hit at the wide alignment is never retried narrow — it mirrors the
/// original's `_hook_mem_unmapped`, which returns before the retry is even
/// attempted.
pub fn handle_page_fault<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &mut EmulatorHandle,
    ip: u64,
    access: AccessKind,
    address: u64,
    size: u64,
) -> PageFaultOutcome {
    match try_bridge(plugin, state, handle, ip, access, address, size, WIDE_ALIGNMENT) {
        Ok(()) => PageFaultOutcome::Installed,
        Err(PageBridgeError::ZeroPageGuard) => {
            PageFaultOutcome::Stop(StopReason::ZeroPage)
        }
        Err(_) => match try_bridge(plugin, state, handle, ip, access, address, size, PAGE_SIZE) {
            Ok(()) => PageFaultOutcome::Installed,
            Err(err) => {
                tracing::warn!(?err, address, "page bridge failed at narrow alignment");
                PageFaultOutcome::Stop(stop_reason_for(err))
            }
        },
    }
}

fn try_bridge<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    handle: &mut EmulatorHandle,
    ip: u64,
    access: AccessKind,
    address: u64,
    size: u64,
    alignment: u64,
) -> Result<(), PageBridgeError> {
    let options = *state.options();
    let addr_bits = state.architecture().bits();
    let (start, end, wraps) = align_range(address, size, alignment, addr_bits);

    if options.zeropage_guard && (start == 0 || wraps) {
        return Err(PageBridgeError::ZeroPageGuard);
    }

    let aligned_len = end - start;
    let npages = aligned_len / PAGE_SIZE;

    let mut missing = 0u64;
    let mut present_perms: HashSet<Permission> = HashSet::new();
    let mut page = start;
    for _ in 0..npages {
        match state.memory().permission(page) {
            PagePermission::Missing => missing += 1,
            PagePermission::Symbolic => {
                present_perms.insert(Permission::READ | Permission::WRITE | Permission::EXEC);
            }
            PagePermission::Concrete(p) => {
                let p = if options.enable_nx { p } else { p | Permission::EXEC };
                present_perms.insert(p);
            }
        }
        page += PAGE_SIZE;
    }

    let resolved_perm = if missing == npages {
        if options.strict_page_access {
            return Err(PageBridgeError::AccessingZeroPage);
        }
        if access == AccessKind::Fetch {
            return Err(PageBridgeError::FetchingZeroPage);
        }
        state.memory_mut().map_region(start, aligned_len, Permission::READ | Permission::WRITE);
        Permission::READ | Permission::WRITE
    } else if missing == 0 && present_perms.len() == 1 {
        *present_perms.iter().next().expect("checked len == 1 above")
    } else {
        return Err(PageBridgeError::MixedPermissions);
    };

    // Best-effort on the wide first attempt (partial results tolerated);
    // strict on the narrow retry (spec.md §4.3 "Content and taint").
    let best_effort = alignment == WIDE_ALIGNMENT;
    let objects = state
        .memory()
        .load_objects(start, aligned_len, best_effort)
        .map_err(|_| PageBridgeError::Segfault)?;

    let mut content = vec![0u8; aligned_len as usize];
    let mut taint = vec![0u8; aligned_len as usize];

    let mut cursor = end;
    for object in objects.iter().rev() {
        let obj_len = object.value.byte_len() as u64;
        let obj_end = object.addr + obj_len;
        if obj_end < cursor {
            fill_gap(&mut taint, start, obj_end, cursor, options.cgc_zero_fill_unconstrained_memory);
        }

        match classify(plugin, state, ip, &object.value) {
            Classification::Value(v) if !v.is_symbolic() => {
                let bytes = v
                    .concrete_bytes()
                    .expect("classify() returned a non-symbolic value with no concrete bytes");
                let offset = (object.addr - start) as usize;
                content[offset..offset + bytes.len()].copy_from_slice(&bytes);
            }
            _ => taint_range(&mut taint, start, object.addr, obj_len),
        }

        cursor = object.addr;
    }
    if start < cursor {
        fill_gap(&mut taint, start, start, cursor, options.cgc_zero_fill_unconstrained_memory);
    }

    let taint = taint.iter().any(|&b| b != 0).then_some(taint);

    if !resolved_perm.contains(Permission::WRITE) && taint.is_none() {
        let cached = handle.native.cache_page(start, aligned_len, &content, resolved_perm.bits() as u64);
        if !cached {
            return Err(PageBridgeError::MixedPermissions);
        }
    } else {
        handle.engine.mem_map(start, aligned_len, resolved_perm.bits());
        handle.engine.mem_write(start, &content);
        handle.track_mapped(start, aligned_len);
        handle.native.activate(start, aligned_len, taint.as_deref());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_range_widens_to_64kib_first() {
        let (start, end, wraps) = align_range(0x1234_5678, 4, WIDE_ALIGNMENT, 64);
        assert_eq!(start, 0x1234_0000);
        assert_eq!(end, 0x1235_0000);
        assert!(!wraps);
    }

    #[test]
    fn align_range_narrows_to_4kib_on_retry() {
        let (start, end, wraps) = align_range(0x1234_5678, 4, PAGE_SIZE, 64);
        assert_eq!(start, 0x1234_5000);
        assert_eq!(end, 0x1234_6000);
        assert!(!wraps);
    }

    #[test]
    fn align_range_reports_wraparound_at_the_top_of_the_address_space() {
        let (_, _, wraps) = align_range(u64::MAX - 2, 16, PAGE_SIZE, 64);
        assert!(wraps);
    }

    #[test]
    fn align_range_is_a_no_op_on_an_already_aligned_address() {
        let (start, end, _) = align_range(0x2000, PAGE_SIZE, PAGE_SIZE, 64);
        assert_eq!(start, 0x2000);
        assert_eq!(end, 0x3000);
    }

    #[test]
    fn align_range_reports_wraparound_at_the_top_of_a_32bit_address_space() {
        // 0xffff_0000 + 0x1_0000 == 0x1_0000_0000, exactly the top of a
        // 32-bit address space, even though it fits comfortably in a u64.
        let (_, _, wraps) = align_range(0xffff_0000, 0x1_0000, WIDE_ALIGNMENT, 32);
        assert!(wraps);
    }

    #[test]
    fn align_range_does_not_report_wraparound_within_a_32bit_address_space() {
        let (_, _, wraps) = align_range(0x1234_5678, 4, WIDE_ALIGNMENT, 32);
        assert!(!wraps);
    }
}
