use crate::error::NativeError;
use crate::types::{EngineHandle, MemPatch, NativeStatePtr, TransmitRecord, VexArchInfo};
use libc::c_int;

/// Every entry point the native emulator engine's shared object must export,
/// each prefixed with the library's configured prefix (spec.md §6 — the
/// original's `simunicorn_` convention). Resolved once at load time; callers
/// never touch `libloading::Symbol` directly.
pub struct NativeFunctions {
    pub alloc: unsafe extern "C" fn(EngineHandle, u64) -> NativeStatePtr,
    pub dealloc: unsafe extern "C" fn(NativeStatePtr),
    pub hook: unsafe extern "C" fn(NativeStatePtr),
    pub unhook: unsafe extern "C" fn(NativeStatePtr),
    pub start: unsafe extern "C" fn(NativeStatePtr, u64, u64) -> c_int,
    pub stop: unsafe extern "C" fn(NativeStatePtr, c_int),
    pub sync: unsafe extern "C" fn(NativeStatePtr) -> *mut MemPatch,
    pub destroy: unsafe extern "C" fn(*mut MemPatch),
    pub bbl_addrs: unsafe extern "C" fn(NativeStatePtr) -> *const u64,
    pub stack_pointers: unsafe extern "C" fn(NativeStatePtr) -> *const u64,
    pub bbl_addr_count: unsafe extern "C" fn(NativeStatePtr) -> u64,
    pub syscall_count: unsafe extern "C" fn(NativeStatePtr) -> u64,
    pub step: unsafe extern "C" fn(NativeStatePtr) -> u64,
    pub stop_reason: unsafe extern "C" fn(NativeStatePtr) -> c_int,
    pub stopping_register: unsafe extern "C" fn(NativeStatePtr) -> u64,
    pub stopping_memory: unsafe extern "C" fn(NativeStatePtr) -> u64,
    pub activate: unsafe extern "C" fn(NativeStatePtr, u64, u64, *const u8),
    pub set_stops: unsafe extern "C" fn(NativeStatePtr, u64, *const u64),
    pub cache_page: unsafe extern "C" fn(NativeStatePtr, u64, u64, *const u8, u64) -> bool,
    pub uncache_page: unsafe extern "C" fn(NativeStatePtr, u64),
    pub enable_symbolic_reg_tracking: unsafe extern "C" fn(NativeStatePtr, c_int, VexArchInfo),
    pub disable_symbolic_reg_tracking: unsafe extern "C" fn(NativeStatePtr),
    pub symbolic_register_data: unsafe extern "C" fn(NativeStatePtr, u64, *const u64),
    pub get_symbolic_registers: unsafe extern "C" fn(NativeStatePtr, *mut u64) -> u64,
    pub is_interrupt_handled: unsafe extern "C" fn(NativeStatePtr) -> bool,
    pub set_transmit_sysno: unsafe extern "C" fn(NativeStatePtr, u32, u64),
    pub process_transmit: unsafe extern "C" fn(NativeStatePtr, u32) -> *const TransmitRecord,
    pub set_tracking: unsafe extern "C" fn(NativeStatePtr, bool, bool),
    pub executed_pages: unsafe extern "C" fn(NativeStatePtr) -> u64,
}

macro_rules! resolve {
    ($lib:expr, $prefix:expr, $name:literal) => {{
        let symbol_name = format!("{}{}", $prefix, $name);
        // SAFETY: the transmuted signature here matches the C ABI the
        // native library is documented to export (spec.md §6). A mismatched
        // native build will simply crash on first call; there is no way to
        // verify ABI shape from the symbol table alone.
        unsafe {
            *$lib
                .get(symbol_name.as_bytes())
                .map_err(|_| NativeError::MissingSymbol(symbol_name.clone()))?
        }
    }};
}

/// A loaded native emulator library: the dynamic library handle plus every
/// resolved entry point. Kept alive for the lifetime of the process once
/// loaded, matching the original's module-level `_UC_NATIVE` singleton.
pub struct Library {
    // Order matters only in that this must outlive `functions`: the raw
    // function pointers in `functions` point into the mapped shared object.
    // `None` only for a `test-support`-built fake table, whose functions are
    // plain Rust `extern "C" fn`s rather than symbols resolved from a `.so`.
    _handle: Option<libloading::Library>,
    pub functions: NativeFunctions,
}

impl Library {
    /// Attempts to load the native emulator shared object at `path`,
    /// resolving every entry point with the given symbol prefix (e.g.
    /// `"simunicorn_"`). Returns `Err` if the library can't be opened or is
    /// missing a required symbol — the caller (accelerator's C1) treats this
    /// as "native support disabled", not a hard failure.
    pub fn open(path: impl AsRef<std::ffi::OsStr>, prefix: &str) -> Result<Self, NativeError> {
        let handle = unsafe { libloading::Library::new(path)? };

        let functions = NativeFunctions {
            alloc: resolve!(handle, prefix, "alloc"),
            dealloc: resolve!(handle, prefix, "dealloc"),
            hook: resolve!(handle, prefix, "hook"),
            unhook: resolve!(handle, prefix, "unhook"),
            start: resolve!(handle, prefix, "start"),
            stop: resolve!(handle, prefix, "stop"),
            sync: resolve!(handle, prefix, "sync"),
            destroy: resolve!(handle, prefix, "destroy"),
            bbl_addrs: resolve!(handle, prefix, "bbl_addrs"),
            stack_pointers: resolve!(handle, prefix, "stack_pointers"),
            bbl_addr_count: resolve!(handle, prefix, "bbl_addr_count"),
            syscall_count: resolve!(handle, prefix, "syscall_count"),
            step: resolve!(handle, prefix, "step"),
            stop_reason: resolve!(handle, prefix, "stop_reason"),
            stopping_register: resolve!(handle, prefix, "stopping_register"),
            stopping_memory: resolve!(handle, prefix, "stopping_memory"),
            activate: resolve!(handle, prefix, "activate"),
            set_stops: resolve!(handle, prefix, "set_stops"),
            cache_page: resolve!(handle, prefix, "cache_page"),
            uncache_page: resolve!(handle, prefix, "uncache_page"),
            enable_symbolic_reg_tracking: resolve!(handle, prefix, "enable_symbolic_reg_tracking"),
            disable_symbolic_reg_tracking: resolve!(
                handle,
                prefix,
                "disable_symbolic_reg_tracking"
            ),
            symbolic_register_data: resolve!(handle, prefix, "symbolic_register_data"),
            get_symbolic_registers: resolve!(handle, prefix, "get_symbolic_registers"),
            is_interrupt_handled: resolve!(handle, prefix, "is_interrupt_handled"),
            set_transmit_sysno: resolve!(handle, prefix, "set_transmit_sysno"),
            process_transmit: resolve!(handle, prefix, "process_transmit"),
            set_tracking: resolve!(handle, prefix, "set_tracking"),
            executed_pages: resolve!(handle, prefix, "executed_pages"),
        };

        tracing::info!(prefix, "native emulator library loaded");

        Ok(Self {
            _handle: Some(handle),
            functions,
        })
    }

    /// Builds a `Library` around a hand-written `NativeFunctions` table
    /// instead of one resolved from a loaded shared object. Used by the
    /// `fake` module to exercise the FFI boundary in tests without a real
    /// native emulator build.
    #[cfg(feature = "test-support")]
    pub fn from_functions(functions: NativeFunctions) -> Self {
        Self {
            _handle: None,
            functions,
        }
    }
}
