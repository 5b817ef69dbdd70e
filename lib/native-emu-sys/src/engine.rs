use crate::types::EngineHandle;

/// The minimal surface the page bridge needs from the underlying CPU
/// emulator engine itself (distinct from the `simunicorn_`-prefixed glue
/// functions in [`crate::library::NativeFunctions`]).
///
/// Instruction decode, CPU state, and hook infrastructure are the native
/// emulator engine's own concern and out of scope for this crate (spec.md
/// §1) — this trait exists only so the page bridge and handle pool have
/// something concrete to call `mem_map`/`mem_write`/`mem_unmap`/`reset`
/// against without owning an implementation of the engine itself. The
/// original wraps this distinction as `Uniwrapper` around `unicorn.Uc`.
pub trait NativeEngine {
    fn handle(&self) -> EngineHandle;

    /// Maps a fresh, page-aligned region with the given RWX permission bits
    /// (see `state_api::Permission`), without overwriting any existing
    /// mapping.
    fn mem_map(&self, addr: u64, len: u64, perm: u8);

    fn mem_write(&self, addr: u64, bytes: &[u8]);

    fn mem_unmap(&self, addr: u64, len: u64);

    /// Writes `bytes` into the engine's flat register file at `offset`
    /// (using the same VEX-style byte-offset convention as
    /// `state_api::RegisterFile`, so the marshaller can move bytes between
    /// the two without a per-register translation table).
    fn reg_write(&self, offset: usize, bytes: &[u8]);

    fn reg_read(&self, offset: usize, size: usize) -> Vec<u8>;

    /// Reads back `len` bytes of guest memory, used by the mutation-replay
    /// step of `finish` to pull bytes the native side patched during the
    /// episode (spec.md §4.7 "Mutation replay").
    fn mem_read(&self, addr: u64, len: u64) -> Vec<u8>;

    /// Unmaps every region and clears installed hooks' internal state
    /// without removing the hooks themselves, for the reuse path (spec.md
    /// §4.1: "unmap every tracked region ... hook state is retained").
    fn reset(&self);
}
