//! C1: per-thread ownership of native emulator instances (spec.md §4.1).

use crate::error::AcceleratorError;
use crate::plugin::CacheKey;
use native_emu_sys::{Library, NativeEngine, NativeState};
use state_api::Architecture;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Process-global monotonic id counter (spec.md §5). Every handle
/// acquisition rotates a fresh id, stamped into both the handle and the
/// acquiring plugin, so a later acquisition can tell whether it's the last
/// plugin that touched this thread's handle.
static UNICOUNT: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    UNICOUNT.fetch_add(1, Ordering::Relaxed)
}

static NATIVE_LIBRARY: OnceLock<Option<Library>> = OnceLock::new();

/// Loads the native emulator shared object once for the process. Safe to
/// call more than once (only the first call's arguments take effect);
/// failure is logged and leaves the accelerator permanently disabled for
/// this process, mirroring the original's `try: import unicorn ... except
/// ImportError: unicorn = None`.
pub fn init_native_library(path: impl AsRef<std::ffi::OsStr>, prefix: &str) {
    NATIVE_LIBRARY.get_or_init(|| match Library::open(path, prefix) {
        Ok(lib) => Some(lib),
        Err(err) => {
            tracing::warn!(error = %err, "native emulator library unavailable; accelerator disabled");
            None
        }
    });
}

/// Installs a pre-built (typically fake) [`Library`] in place of loading one
/// from disk. Exists so integration tests can exercise C1/C3/C5/C7 against
/// `native_emu_sys::fake`'s table without a real native emulator build.
#[cfg(feature = "test-support")]
pub fn install_native_library_for_tests(lib: Library) {
    NATIVE_LIBRARY.get_or_init(|| Some(lib));
}

pub fn native_library() -> Option<&'static Library> {
    NATIVE_LIBRARY.get().and_then(|slot| slot.as_ref())
}

/// One per-thread native emulator instance plus its bookkeeping (spec.md §3).
pub struct EmulatorHandle {
    pub engine: Box<dyn NativeEngine>,
    pub native: NativeState<'static>,
    pub mapped: HashSet<(u64, u64)>,
    pub hooked: bool,
    pub architecture: Architecture,
    pub cache_key: CacheKey,
    pub id: u64,
}

impl EmulatorHandle {
    fn new(
        lib: &'static Library,
        engine: Box<dyn NativeEngine>,
        architecture: Architecture,
        cache_key: CacheKey,
    ) -> Self {
        let native = NativeState::alloc(lib, engine.handle(), cache_key.0);
        Self {
            engine,
            native,
            mapped: HashSet::new(),
            hooked: false,
            architecture,
            cache_key,
            id: 0,
        }
    }

    /// Unmaps every tracked region; hook state is retained (spec.md §4.1:
    /// "hook state is retained unless explicitly reset").
    fn reset(&mut self) {
        for &(addr, len) in &self.mapped {
            self.engine.mem_unmap(addr, len);
        }
        self.mapped.clear();
    }

    pub fn track_mapped(&mut self, addr: u64, len: u64) {
        self.mapped.insert((addr, len));
    }
}

thread_local! {
    static HANDLE: RefCell<Option<EmulatorHandle>> = RefCell::new(None);
}

/// Thread-local pool of at most one [`EmulatorHandle`] (spec.md §4.1, §5:
/// "the emulator handle is strictly thread-local; it is never shared across
/// threads").
pub struct EmulatorHandlePool;

impl EmulatorHandlePool {
    /// Applies the reuse/reset/reconstruct decision (spec.md §4.1):
    /// - no handle, or architecture/cache key differ → construct new.
    /// - else if `plugin_unicount` doesn't match the handle's stamped id →
    ///   `reset()` if the architecture allows handle reuse, else reconstruct
    ///   (MIPS32 is known to leak state across instances).
    /// - else reuse as-is.
    ///
    /// `make_engine` is only invoked on the construct/reconstruct paths.
    pub fn acquire<F>(
        architecture: Architecture,
        cache_key: CacheKey,
        plugin_unicount: &mut u64,
        make_engine: F,
    ) -> Result<(), AcceleratorError>
    where
        F: FnOnce() -> Box<dyn NativeEngine>,
    {
        let lib = native_library().ok_or(AcceleratorError::NativeLibraryUnavailable)?;
        HANDLE.with(|cell| {
            let mut slot = cell.borrow_mut();
            let needs_new = match slot.as_ref() {
                None => true,
                Some(h) => h.architecture != architecture || h.cache_key != cache_key,
            };
            if needs_new {
                *slot = Some(EmulatorHandle::new(lib, make_engine(), architecture, cache_key));
            } else if let Some(h) = slot.as_mut() {
                if *plugin_unicount != h.id {
                    if architecture.allows_handle_reuse() {
                        h.reset();
                    } else {
                        *slot =
                            Some(EmulatorHandle::new(lib, make_engine(), architecture, cache_key));
                    }
                }
            }
            let id = next_id();
            let h = slot.as_mut().expect("handle was just constructed or reused above");
            h.id = id;
            *plugin_unicount = id;
            Ok(())
        })
    }

    pub fn with_current<R>(f: impl FnOnce(&mut EmulatorHandle) -> R) -> Option<R> {
        HANDLE.with(|cell| cell.borrow_mut().as_mut().map(f))
    }

    /// Discards the thread-local handle entirely (I4: after any stop reason
    /// other than normal/stoppoint/symbolic-mem/symbolic-reg).
    pub fn discard() {
        HANDLE.with(|cell| *cell.borrow_mut() = None);
    }
}
