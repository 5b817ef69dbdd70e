use libc::{c_int, c_void};
use std::marker::PhantomData;

/// Opaque per-episode native state handle (`state_t` in spec.md §6).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeStatePtr(pub *mut c_void);

unsafe impl Send for NativeStatePtr {}

/// Opaque handle to the native emulator engine instance itself
/// (`uc_engine_t` in spec.md §6) — owned by the accelerator's `EmulatorHandle`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandle(pub *mut c_void);

unsafe impl Send for EngineHandle {}

/// The closed `STOP_*` enumeration (spec.md §6).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Normal = 0,
    StopPoint = 1,
    SymbolicMem = 2,
    SymbolicReg = 3,
    Error = 4,
    Syscall = 5,
    ExecNone = 6,
    ZeroPage = 7,
    NoStart = 8,
    Segfault = 9,
    ZeroDiv = 10,
    NoDecode = 11,
}

impl TryFrom<c_int> for StopReason {
    type Error = c_int;

    fn try_from(value: c_int) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => StopReason::Normal,
            1 => StopReason::StopPoint,
            2 => StopReason::SymbolicMem,
            3 => StopReason::SymbolicReg,
            4 => StopReason::Error,
            5 => StopReason::Syscall,
            6 => StopReason::ExecNone,
            7 => StopReason::ZeroPage,
            8 => StopReason::NoStart,
            9 => StopReason::Segfault,
            10 => StopReason::ZeroDiv,
            11 => StopReason::NoDecode,
            other => return Err(other),
        })
    }
}

impl StopReason {
    /// Stop reasons after which the thread-local emulator handle must be
    /// discarded rather than reused (spec.md I4).
    pub fn requires_handle_discard(self) -> bool {
        !matches!(
            self,
            StopReason::Normal
                | StopReason::StopPoint
                | StopReason::SymbolicMem
                | StopReason::SymbolicReg
        )
    }
}

/// `mem_update_t`: one node of the mutation linked list returned by `sync`.
#[repr(C)]
pub struct MemPatch {
    pub address: u64,
    pub length: u64,
    pub next: *mut MemPatch,
}

/// `transmit_record_t`: one captured CGC transmit.
#[repr(C)]
pub struct TransmitRecord {
    pub data: *const u8,
    pub count: u32,
}

/// Mirrors VEX's cache-topology descriptor; only ever passed through to
/// `enable_symbolic_reg_tracking` with `caches` zeroed, per spec.md §4.5 /
/// the original's `archinfo['hwcache_info']['caches'] = 0` workaround.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VexCacheInfo {
    pub num_levels: u32,
    pub num_caches: u32,
    pub caches: *mut c_void,
    pub icaches_maintain_coherence: bool,
}

/// Mirrors VEX's architecture-info descriptor passed to
/// `enable_symbolic_reg_tracking` so the native side can decode instructions
/// correctly while scanning for symbolic-byte reads.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VexArchInfo {
    pub hwcaps: u32,
    pub endness: c_int,
    pub hwcache_info: VexCacheInfo,
    pub ppc_icache_line_sz_b: c_int,
    pub ppc_dcbz_sz_b: u32,
    pub ppc_dcbzl_sz_b: u32,
    pub arm64_dmin_line_lg2_sz_b: u32,
    pub arm64_imin_line_lg2_sz_b: u32,
    pub x86_cr0: u32,
}

/// The `VexArch` selector passed alongside `VexArchInfo`.
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum VexArch {
    X86 = 0,
    Amd64 = 1,
    Mips32 = 2,
}

/// Borrowed iterator over a native mutation linked list, freeing it via
/// `destroy` on drop. Modeled as a borrow per spec.md §9's FFI-contract
/// guidance ("ownership remains with the native side until a free call;
/// model it as a borrowed iterator").
pub struct MutationIter<'a> {
    pub(crate) head: *mut MemPatch,
    pub(crate) cursor: *mut MemPatch,
    pub(crate) _marker: PhantomData<&'a ()>,
}

impl Iterator for MutationIter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        // SAFETY: `cursor` is either null or was handed to us by the native
        // `sync` call and remains valid until `destroy` is invoked in `Drop`.
        let node = unsafe { &*self.cursor };
        let item = (node.address, node.length);
        self.cursor = node.next;
        Some(item)
    }
}
