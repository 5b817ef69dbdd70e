//! Trait contracts the accelerator needs from the symbolic executor it is
//! embedded in: the register file, paged memory, constraint solver, and the
//! symbolic value abstraction itself.
//!
//! None of these are implemented here — the symbolic executor owns the real
//! types. This crate exists so `crates/accelerator` can be compiled and
//! tested without depending on a specific symbolic-execution engine.

mod error;
mod value;

pub use error::StateError;
pub use value::{VarId, ValueId};

use bitflags::bitflags;
use std::collections::HashSet;

/// CPU architectures the accelerator knows how to bridge to a native
/// emulator. Kept as a closed enum rather than a trait: the per-architecture
/// behavior lives in `accelerator::arch`'s capability table, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    Amd64,
    Mips32,
}

impl Architecture {
    pub fn bits(self) -> u32 {
        match self {
            Architecture::X86 | Architecture::Mips32 => 32,
            Architecture::Amd64 => 64,
        }
    }

    /// MIPS32's native emulator is known to leak state across instances, so
    /// handles for it are never reused, only rebuilt (spec.md §4.1).
    pub fn allows_handle_reuse(self) -> bool {
        !matches!(self, Architecture::Mips32)
    }
}

bitflags! {
    /// Page permission bits, matching the native emulator's RWX convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// Result of querying permissions for a single 4 KiB page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePermission {
    /// No page object exists at this address in the symbolic memory.
    Missing,
    /// The permission bits themselves are symbolic; treated as RWX (spec.md §4.3).
    Symbolic,
    Concrete(Permission),
}

/// The tunable knobs that live on the *symbolic state* rather than on the
/// accelerator plugin (spec.md §4.2–§4.6 reference these as `option`s of the
/// state, separate from the plugin's own cooldown/threshold configuration
/// in `AcceleratorPlugin`).
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionSet {
    pub aggressive_concretization: bool,
    pub sym_regs_support: bool,
    pub zeropage_guard: bool,
    pub enable_nx: bool,
    pub strict_page_access: bool,
    pub cgc_zero_fill_unconstrained_memory: bool,
    pub threshold_concretization: bool,
    pub handle_transmit_syscall: bool,
    pub track_bbl_addrs: bool,
    pub track_stack_pointers: bool,
}

/// A (possibly) symbolic value exchanged across the accelerator/solver
/// boundary: a register value, a chunk of memory, or a flag.
pub trait SymbolicValue: Clone {
    /// Stable identity, used to avoid emitting the same aggressive-
    /// concretization constraint twice for the same logical value
    /// (spec.md I5 / P4). Must not change as the solver simplifies the
    /// underlying AST.
    fn identity(&self) -> ValueId;

    /// Free variables referenced by this value, used to test membership in
    /// `always_concretize` / `never_concretize`.
    fn free_variables(&self) -> HashSet<VarId>;

    /// True if this value is not a single concrete bitvector.
    fn is_symbolic(&self) -> bool;

    /// True if any annotation is attached (annotations carry semantics the
    /// emulator cannot preserve, so such values are always refused by C2).
    fn has_annotations(&self) -> bool;

    /// Number of bytes this value occupies.
    fn byte_len(&self) -> usize;

    /// Concrete little-endian bytes, if `!is_symbolic()`.
    fn concrete_bytes(&self) -> Option<Vec<u8>>;

    /// A byte-range subvalue, used when materializing part of a memory
    /// object that only partially overlaps a faulting range.
    fn slice(&self, byte_offset: usize, byte_len: usize) -> Self;

    /// Builds `self == concrete` as a new value, ready to hand to
    /// `SymbolicState::add_constraint`. `concrete` is expected to itself be
    /// concrete (the output of `Solver::eval_single_model`).
    fn build_equality(&self, concrete: &Self) -> Self;

    /// Tags a just-built equality constraint with the aggressive-
    /// concretization marker keyed by the instruction pointer at the time
    /// of concretization (spec.md §4.2 step 3).
    fn annotate_aggressive_concretization(self, at_ip: u64) -> Self;
}

/// A single materialized run of bytes backing part of a faulting range,
/// as returned by `PagedMemory::load_objects`.
pub struct MemoryObject<V> {
    /// Address of the first byte of `value`.
    pub addr: u64,
    pub value: V,
}

pub trait PagedMemory {
    type Value: SymbolicValue;

    fn permission(&self, addr: u64) -> PagePermission;

    /// Creates a fresh page (or pages) at `[start, start+length)` with the
    /// given permission, without overwriting any existing mapping.
    fn map_region(&mut self, start: u64, length: u64, perm: Permission);

    /// Loads every memory object overlapping `[start, start+length)`,
    /// ordered by ascending address. `best_effort` controls behavior on a
    /// segfault-raising access: true asks for a best-effort partial result
    /// (used on the wide first page-bridge attempt), false propagates the
    /// segfault (used on the narrow retry).
    fn load_objects(
        &self,
        start: u64,
        length: u64,
        best_effort: bool,
    ) -> Result<Vec<MemoryObject<Self::Value>>, StateError>;

    fn store(&mut self, addr: u64, bytes: &[u8]);
}

pub trait RegisterFile {
    type Value: SymbolicValue;

    fn load(&self, offset: usize, size: usize) -> Self::Value;
    fn store(&mut self, offset: usize, size: usize, value: &Self::Value);

    /// Writes concrete bytes read back from the native emulator after a
    /// stop (spec.md §4.5 egress) without going through a `Self::Value`
    /// constructor — the register file owns how a raw byte string becomes
    /// one of its values.
    fn store_bytes(&mut self, offset: usize, bytes: &[u8]);

    /// Byte offset and size of a named register in the register file, if
    /// the architecture has one by that name.
    fn register_offset(&self, name: &str) -> Option<(usize, usize)>;

    /// One past the last byte offset any register occupies; used to bound
    /// the symbolic-register-tracking scan (spec.md §4.5).
    fn highest_offset(&self) -> usize;
}

pub trait Solver {
    type Value: SymbolicValue;

    fn eval_u64(&self, v: &Self::Value) -> Result<u64, StateError>;
    fn eval_bytes(&self, v: &Self::Value, len: usize) -> Result<Vec<u8>, StateError>;

    /// Produces one concrete model of `v` as a same-shaped concrete value,
    /// without adding any constraint.
    fn eval_single_model(&self, v: &Self::Value) -> Self::Value;
}

/// The full surface the accelerator reads from and writes to. Implemented
/// by the symbolic executor's state object; see spec.md §6.
pub trait SymbolicState {
    type Value: SymbolicValue;
    type Memory: PagedMemory<Value = Self::Value>;
    type Registers: RegisterFile<Value = Self::Value>;
    type Solver: Solver<Value = Self::Value>;

    fn architecture(&self) -> Architecture;
    fn registers(&self) -> &Self::Registers;
    fn registers_mut(&mut self) -> &mut Self::Registers;
    fn memory(&self) -> &Self::Memory;
    fn memory_mut(&mut self) -> &mut Self::Memory;
    fn solver(&self) -> &Self::Solver;
    fn options(&self) -> &OptionSet;

    fn ip(&self) -> Self::Value;

    fn add_constraint(&mut self, constraint: Self::Value);

    /// Writes captured CGC transmit bytes to the emulated stdout (fd 1).
    fn stdout_write(&mut self, bytes: &[u8]);

    /// Whether a CGC-model plugin is attached to this state (gates transmit
    /// interception, spec.md §4.7).
    fn has_cgc_plugin(&self) -> bool;
}
