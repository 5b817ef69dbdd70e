/// Native page granularity. All page-bridge alignment math is in units of
/// this (spec.md §4.3).
pub const PAGE_SIZE: u64 = 0x1000;

/// Wide first-attempt alignment for the page bridge; retried at `PAGE_SIZE`
/// on failure (spec.md §4.3).
pub const WIDE_ALIGNMENT: u64 = 0x10000;

/// Reserved fake descriptor-table region activated during `setup` (spec.md
/// §4.7, §4.8). Mutations inside this range are never replayed back into
/// the symbolic state (I3).
pub const FAKE_GDT_START: u64 = 0x1000;
pub const FAKE_GDT_END: u64 = 0x2000;

/// MSRs used by the FS/GS-base write trampoline (spec.md §4.5).
pub const MSR_FS_BASE: u32 = 0xC000_0100;
pub const MSR_GS_BASE: u32 = 0xC000_0101;

/// Scratch page the trampoline code (`wrmsr`) is assembled into. Chosen well
/// outside any address a real binary under analysis is likely to use.
pub const MSR_TRAMPOLINE_BASE: u64 = 0x1_00B0_0000;

/// Condition-code byte ranges in the register file that get widened to
/// "symbolic" as a whole once any byte inside is symbolic (spec.md §4.5).
pub const X86_FLAGS_REGION: (usize, usize) = (40, 56);
pub const AMD64_FLAGS_REGION: (usize, usize) = (144, 176);

/// Below this blocks/sec throughput, a finished episode counts as slow
/// enough to trigger the nonunicorn cooldown (spec.md §4.7), unless running
/// under `AcceleratorConfig::testing`.
pub const SLOW_THROUGHPUT_BLOCKS_PER_SEC: f64 = 10.0;

/// `executed_pages` sentinel signaling end of the set (spec.md §6).
pub const EXECUTED_PAGES_END: u64 = u64::MAX;
