use crate::error::NativeError;
use crate::library::Library;
use crate::types::{
    EngineHandle, MemPatch, MutationIter, NativeStatePtr, StopReason, TransmitRecord, VexArch,
    VexArchInfo,
};
use std::marker::PhantomData;

/// Sentinel `executed_pages` returns to signal "no more pages" (spec.md §6).
const EXECUTED_PAGES_END: u64 = u64::MAX;

/// A safe(r) handle over one native-side episode state (`state_t`). Every
/// method is a thin, typed call into the resolved `NativeFunctions` table;
/// none of it is reentrant-safe across threads, matching the native
/// library's documented non-reentrancy (spec.md §5).
pub struct NativeState<'lib> {
    ptr: NativeStatePtr,
    lib: &'lib Library,
}

impl<'lib> NativeState<'lib> {
    /// Binds a new native state to `engine`, tagged with `cache_key` so the
    /// native side can recognize reused engine instances.
    pub fn alloc(lib: &'lib Library, engine: EngineHandle, cache_key: u64) -> Self {
        let ptr = unsafe { (lib.functions.alloc)(engine, cache_key) };
        Self { ptr, lib }
    }

    pub fn hook(&self) {
        unsafe { (self.lib.functions.hook)(self.ptr) }
    }

    pub fn unhook(&self) {
        unsafe { (self.lib.functions.unhook)(self.ptr) }
    }

    pub fn start(&self, addr: u64, steps: u64) -> Result<(), NativeError> {
        let rc = unsafe { (self.lib.functions.start)(self.ptr, addr, steps) };
        if rc != 0 {
            return Err(NativeError::StartFailed(rc));
        }
        Ok(())
    }

    pub fn stop(&self, reason: StopReason) {
        unsafe { (self.lib.functions.stop)(self.ptr, reason as i32) }
    }

    pub fn sync(&self) -> MutationIter<'_> {
        let head = unsafe { (self.lib.functions.sync)(self.ptr) };
        MutationIter {
            head,
            cursor: head,
            _marker: PhantomData,
        }
    }

    /// Frees the linked list previously returned by `sync`. Consumes the
    /// iterator so it cannot be walked again after the backing memory is
    /// released.
    pub fn destroy_mutations(&self, mutations: MutationIter<'_>) {
        let head: *mut MemPatch = mutations.head;
        unsafe { (self.lib.functions.destroy)(head) }
    }

    pub fn step(&self) -> u64 {
        unsafe { (self.lib.functions.step)(self.ptr) }
    }

    pub fn stop_reason(&self) -> Result<StopReason, NativeError> {
        let raw = unsafe { (self.lib.functions.stop_reason)(self.ptr) };
        StopReason::try_from(raw).map_err(NativeError::UnknownStopCode)
    }

    pub fn stopping_register(&self) -> u64 {
        unsafe { (self.lib.functions.stopping_register)(self.ptr) }
    }

    pub fn stopping_memory(&self) -> u64 {
        unsafe { (self.lib.functions.stopping_memory)(self.ptr) }
    }

    /// Registers (or clears, with `taint = None`) a byte-granular taint map
    /// covering `[addr, addr+len)`.
    pub fn activate(&self, addr: u64, len: u64, taint: Option<&[u8]>) {
        let ptr = taint.map_or(std::ptr::null(), |t| t.as_ptr());
        unsafe { (self.lib.functions.activate)(self.ptr, addr, len, ptr) }
    }

    pub fn set_stops(&self, stop_points: &[u64]) {
        unsafe {
            (self.lib.functions.set_stops)(self.ptr, stop_points.len() as u64, stop_points.as_ptr())
        }
    }

    pub fn cache_page(&self, addr: u64, len: u64, bytes: &[u8], perm: u64) -> bool {
        unsafe { (self.lib.functions.cache_page)(self.ptr, addr, len, bytes.as_ptr(), perm) }
    }

    pub fn uncache_page(&self, addr: u64) {
        unsafe { (self.lib.functions.uncache_page)(self.ptr, addr) }
    }

    pub fn enable_symbolic_reg_tracking(&self, arch: VexArch, archinfo: VexArchInfo) {
        unsafe { (self.lib.functions.enable_symbolic_reg_tracking)(self.ptr, arch as i32, archinfo) }
    }

    pub fn disable_symbolic_reg_tracking(&self) {
        unsafe { (self.lib.functions.disable_symbolic_reg_tracking)(self.ptr) }
    }

    pub fn symbolic_register_data(&self, offsets: Option<&[u64]>) {
        match offsets {
            Some(offsets) => unsafe {
                (self.lib.functions.symbolic_register_data)(
                    self.ptr,
                    offsets.len() as u64,
                    offsets.as_ptr(),
                )
            },
            None => unsafe {
                (self.lib.functions.symbolic_register_data)(self.ptr, 0, std::ptr::null())
            },
        }
    }

    /// Pulls the set of register offsets the native side observed to be
    /// symbolic during the episode just finished.
    pub fn get_symbolic_registers(&self, capacity: usize) -> Vec<u64> {
        let mut buf = vec![0u64; capacity];
        let count =
            unsafe { (self.lib.functions.get_symbolic_registers)(self.ptr, buf.as_mut_ptr()) };
        buf.truncate(count as usize);
        buf
    }

    pub fn is_interrupt_handled(&self) -> bool {
        unsafe { (self.lib.functions.is_interrupt_handled)(self.ptr) }
    }

    pub fn set_transmit_sysno(&self, sysno: u32, transmit_addr: u64) {
        unsafe { (self.lib.functions.set_transmit_sysno)(self.ptr, sysno, transmit_addr) }
    }

    /// Enumerates captured CGC transmits in order; `None` once exhausted.
    pub fn process_transmit(&self, index: u32) -> Option<&'lib [u8]> {
        let record: *const TransmitRecord =
            unsafe { (self.lib.functions.process_transmit)(self.ptr, index) };
        if record.is_null() {
            return None;
        }
        // SAFETY: the native side guarantees `data`/`count` are valid for
        // the lifetime of this state, same as the original's ctypes usage.
        let record = unsafe { &*record };
        Some(unsafe { std::slice::from_raw_parts(record.data, record.count as usize) })
    }

    pub fn set_tracking(&self, track_bbls: bool, track_stack: bool) {
        unsafe { (self.lib.functions.set_tracking)(self.ptr, track_bbls, track_stack) }
    }

    /// Number of basic-block addresses actually captured this episode —
    /// may be smaller than the step count if tracking was capped or
    /// disabled partway through, so callers should size `bbl_addrs`'s
    /// slice from this rather than from `step()`.
    pub fn bbl_addr_count(&self) -> u64 {
        unsafe { (self.lib.functions.bbl_addr_count)(self.ptr) }
    }

    pub fn bbl_addrs(&self, count: usize) -> &'lib [u64] {
        let ptr = unsafe { (self.lib.functions.bbl_addrs)(self.ptr) };
        unsafe { std::slice::from_raw_parts(ptr, count) }
    }

    pub fn stack_pointers(&self, count: usize) -> &'lib [u64] {
        let ptr = unsafe { (self.lib.functions.stack_pointers)(self.ptr) };
        unsafe { std::slice::from_raw_parts(ptr, count) }
    }

    pub fn syscall_count(&self) -> u64 {
        unsafe { (self.lib.functions.syscall_count)(self.ptr) }
    }

    /// Drains the executed-pages set, one page address at a time.
    pub fn executed_pages(&self) -> impl Iterator<Item = u64> + '_ {
        std::iter::from_fn(move || {
            let page = unsafe { (self.lib.functions.executed_pages)(self.ptr) };
            if page == EXECUTED_PAGES_END {
                None
            } else {
                Some(page)
            }
        })
    }
}

impl Drop for NativeState<'_> {
    fn drop(&mut self) {
        unsafe { (self.lib.functions.dealloc)(self.ptr) }
    }
}
