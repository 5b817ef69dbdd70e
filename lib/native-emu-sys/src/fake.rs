//! A fake native function table for integration tests (feature
//! `test-support`). Backs every `simunicorn_`-shaped entry point with a
//! thread-local scratch state instead of a loaded shared object, so C1/C3/C5/
//! C7 can be exercised without the real native emulator build.
//!
//! Only one native state is ever "alive" per thread under this fake, which
//! matches how the accelerator's own handle pool is thread-local — tests
//! call [`install`] before building an [`crate::NativeState`], then read
//! back what was recorded via [`with_state`].

use crate::library::{Library, NativeFunctions};
use crate::types::{EngineHandle, MemPatch, NativeStatePtr, TransmitRecord, VexArchInfo};
use libc::c_int;
use std::cell::RefCell;

/// Everything the fake table can be configured to return, plus a record of
/// what was called, so a test can both script a stop and assert on what the
/// accelerator did to reach it.
#[derive(Default)]
pub struct FakeState {
    pub stop_reason: i32,
    pub steps: u64,
    pub start_result: i32,
    pub stopping_register: u64,
    pub stopping_memory: u64,
    pub mutations: Vec<(u64, u64)>,
    pub transmits: Vec<Vec<u8>>,
    pub bbl_addrs: Vec<u64>,
    pub stack_pointers: Vec<u64>,
    pub syscall_count: u64,
    pub executed_pages: Vec<u64>,
    executed_pages_cursor: usize,
    pub symbolic_registers: Vec<u64>,
    pub is_interrupt_handled: bool,
    pub cache_page_result: bool,

    pub hook_calls: u64,
    pub unhook_calls: u64,
    pub start_calls: Vec<(u64, u64)>,
    pub activate_calls: Vec<(u64, u64, Option<Vec<u8>>)>,
    pub set_stops_calls: Vec<Vec<u64>>,
    pub cache_page_calls: Vec<(u64, u64, Vec<u8>, u64)>,
    pub uncache_page_calls: Vec<u64>,
    pub set_tracking_calls: Vec<(bool, bool)>,
    pub symbolic_reg_tracking_enabled: bool,
}

thread_local! {
    static STATE: RefCell<Option<FakeState>> = RefCell::new(None);
}

/// Installs `state` as the thread's fake native backing store, replacing
/// whatever was there before.
pub fn install(state: FakeState) {
    STATE.with(|cell| *cell.borrow_mut() = Some(state));
}

/// Runs `f` against the thread's installed fake state. Panics if
/// [`install`] hasn't been called on this thread yet.
pub fn with_state<R>(f: impl FnOnce(&mut FakeState) -> R) -> R {
    STATE.with(|cell| {
        let mut guard = cell.borrow_mut();
        let state = guard.as_mut().expect("fake native state not installed on this thread");
        f(state)
    })
}

/// Every real entry point ignores its `NativeStatePtr`: there is exactly one
/// live fake state per thread, keyed by the thread itself rather than by
/// pointer value.
const FAKE_PTR: usize = 0xF47E;

fn ptr() -> NativeStatePtr {
    NativeStatePtr(FAKE_PTR as *mut libc::c_void)
}

unsafe extern "C" fn alloc(_engine: EngineHandle, _cache_key: u64) -> NativeStatePtr {
    ptr()
}

unsafe extern "C" fn dealloc(_ptr: NativeStatePtr) {}

unsafe extern "C" fn hook(_ptr: NativeStatePtr) {
    with_state(|s| s.hook_calls += 1);
}

unsafe extern "C" fn unhook(_ptr: NativeStatePtr) {
    with_state(|s| s.unhook_calls += 1);
}

unsafe extern "C" fn start(_ptr: NativeStatePtr, addr: u64, steps: u64) -> c_int {
    with_state(|s| {
        s.start_calls.push((addr, steps));
        s.start_result
    })
}

unsafe extern "C" fn stop(_ptr: NativeStatePtr, _reason: c_int) {}

unsafe extern "C" fn sync(_ptr: NativeStatePtr) -> *mut MemPatch {
    with_state(|s| {
        let mut head: *mut MemPatch = std::ptr::null_mut();
        for &(address, length) in s.mutations.iter().rev() {
            let node = Box::new(MemPatch { address, length, next: head });
            head = Box::into_raw(node);
        }
        head
    })
}

unsafe extern "C" fn destroy(head: *mut MemPatch) {
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: every node was `Box::into_raw` in `sync` above and is
        // freed at most once, mirroring the ownership handoff `destroy`
        // documents for the real native side.
        let node = unsafe { Box::from_raw(cursor) };
        cursor = node.next;
    }
}

unsafe extern "C" fn bbl_addrs(_ptr: NativeStatePtr) -> *const u64 {
    with_state(|s| s.bbl_addrs.as_ptr())
}

unsafe extern "C" fn stack_pointers(_ptr: NativeStatePtr) -> *const u64 {
    with_state(|s| s.stack_pointers.as_ptr())
}

unsafe extern "C" fn bbl_addr_count(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| s.bbl_addrs.len() as u64)
}

unsafe extern "C" fn syscall_count(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| s.syscall_count)
}

unsafe extern "C" fn step(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| s.steps)
}

unsafe extern "C" fn stop_reason(_ptr: NativeStatePtr) -> c_int {
    with_state(|s| s.stop_reason)
}

unsafe extern "C" fn stopping_register(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| s.stopping_register)
}

unsafe extern "C" fn stopping_memory(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| s.stopping_memory)
}

unsafe extern "C" fn activate(_ptr: NativeStatePtr, addr: u64, len: u64, taint: *const u8) {
    with_state(|s| {
        let taint = if taint.is_null() {
            None
        } else {
            // SAFETY: callers pass a slice of exactly `len` bytes or null,
            // matching `NativeState::activate`'s contract.
            Some(unsafe { std::slice::from_raw_parts(taint, len as usize) }.to_vec())
        };
        s.activate_calls.push((addr, len, taint));
    });
}

unsafe extern "C" fn set_stops(_ptr: NativeStatePtr, count: u64, stops: *const u64) {
    with_state(|s| {
        // SAFETY: caller passes a slice of exactly `count` u64s.
        let slice = unsafe { std::slice::from_raw_parts(stops, count as usize) };
        s.set_stops_calls.push(slice.to_vec());
    });
}

unsafe extern "C" fn cache_page(
    _ptr: NativeStatePtr,
    addr: u64,
    len: u64,
    bytes: *const u8,
    perm: u64,
) -> bool {
    with_state(|s| {
        // SAFETY: caller passes a slice of exactly `len` bytes.
        let slice = unsafe { std::slice::from_raw_parts(bytes, len as usize) };
        s.cache_page_calls.push((addr, len, slice.to_vec(), perm));
        s.cache_page_result
    })
}

unsafe extern "C" fn uncache_page(_ptr: NativeStatePtr, addr: u64) {
    with_state(|s| s.uncache_page_calls.push(addr));
}

unsafe extern "C" fn enable_symbolic_reg_tracking(
    _ptr: NativeStatePtr,
    _arch: c_int,
    _archinfo: VexArchInfo,
) {
    with_state(|s| s.symbolic_reg_tracking_enabled = true);
}

unsafe extern "C" fn disable_symbolic_reg_tracking(_ptr: NativeStatePtr) {
    with_state(|s| s.symbolic_reg_tracking_enabled = false);
}

unsafe extern "C" fn symbolic_register_data(_ptr: NativeStatePtr, _count: u64, _offsets: *const u64) {}

unsafe extern "C" fn get_symbolic_registers(_ptr: NativeStatePtr, out: *mut u64) -> u64 {
    with_state(|s| {
        // SAFETY: callers allocate `out` with capacity for at least as many
        // entries as a prior call told them to expect (spec.md §6).
        for (i, &reg) in s.symbolic_registers.iter().enumerate() {
            unsafe { *out.add(i) = reg };
        }
        s.symbolic_registers.len() as u64
    })
}

unsafe extern "C" fn is_interrupt_handled(_ptr: NativeStatePtr) -> bool {
    with_state(|s| s.is_interrupt_handled)
}

unsafe extern "C" fn set_transmit_sysno(_ptr: NativeStatePtr, _sysno: u32, _addr: u64) {}

unsafe extern "C" fn process_transmit(_ptr: NativeStatePtr, index: u32) -> *const TransmitRecord {
    with_state(|s| match s.transmits.get(index as usize) {
        Some(bytes) => {
            let record = Box::new(TransmitRecord {
                data: bytes.as_ptr(),
                count: bytes.len() as u32,
            });
            Box::into_raw(record)
        }
        None => std::ptr::null(),
    })
}

unsafe extern "C" fn set_tracking(_ptr: NativeStatePtr, track_bbls: bool, track_stack: bool) {
    with_state(|s| s.set_tracking_calls.push((track_bbls, track_stack)));
}

unsafe extern "C" fn executed_pages(_ptr: NativeStatePtr) -> u64 {
    with_state(|s| {
        if s.executed_pages_cursor >= s.executed_pages.len() {
            u64::MAX
        } else {
            let page = s.executed_pages[s.executed_pages_cursor];
            s.executed_pages_cursor += 1;
            page
        }
    })
}

/// Builds a [`Library`] whose entry points are the fake functions above,
/// reading and recording through the calling thread's installed
/// [`FakeState`] (see [`install`]).
pub fn fake_library() -> Library {
    Library::from_functions(NativeFunctions {
        alloc,
        dealloc,
        hook,
        unhook,
        start,
        stop,
        sync,
        destroy,
        bbl_addrs,
        stack_pointers,
        bbl_addr_count,
        syscall_count,
        step,
        stop_reason,
        stopping_register,
        stopping_memory,
        activate,
        set_stops,
        cache_page,
        uncache_page,
        enable_symbolic_reg_tracking,
        disable_symbolic_reg_tracking,
        symbolic_register_data,
        get_symbolic_registers,
        is_interrupt_handled,
        set_transmit_sysno,
        process_transmit,
        set_tracking,
        executed_pages,
    })
}
