//! C8: the tunables that travel with a symbolic state (cooldowns,
//! thresholds, policy sets) and the builder that configures them
//! (spec.md §4.8).

use native_emu_sys::StopReason;
use state_api::{SymbolicState, ValueId, VarId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Opaque token identifying a lineage of states that may share a reusable
/// emulator handle (spec.md GLOSSARY). Stable across forks of the same
/// lineage; a fresh value when the lineage genuinely diverges (e.g. a new
/// top-level state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(pub u64);

/// How many steps/episodes acceleration is disabled for after a given kind
/// of stop, and the live countdowns ticking those disables down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownSettings {
    pub nonunicorn_blocks: u64,
    pub symbolic_registers: u64,
    pub symbolic_memory: u64,
    pub stop_point: u64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            nonunicorn_blocks: 100,
            symbolic_registers: 100,
            symbolic_memory: 100,
            stop_point: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdowns {
    pub nonunicorn_blocks: u64,
    pub symbolic_registers: u64,
    pub symbolic_memory: u64,
    pub stop_point: u64,
}

impl Countdowns {
    /// P5: merging keeps the maximum countdown on each axis.
    fn merge_in_place(&mut self, other: &Countdowns) {
        self.nonunicorn_blocks = self.nonunicorn_blocks.max(other.nonunicorn_blocks);
        self.symbolic_registers = self.symbolic_registers.max(other.symbolic_registers);
        self.symbolic_memory = self.symbolic_memory.max(other.symbolic_memory);
        self.stop_point = self.stop_point.max(other.stop_point);
    }
}

/// Per-instruction / per-variable concretization thresholds. `None` means
/// unbounded (threshold_concretization effectively disabled on that axis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConcretizationThresholds {
    pub memory: Option<u64>,
    pub registers: Option<u64>,
    pub instruction: Option<u64>,
}

impl ConcretizationThresholds {
    /// P5: merging keeps the minimum (tightest) threshold on each axis.
    fn merge_in_place(&mut self, other: &ConcretizationThresholds) {
        self.memory = min_option(self.memory, other.memory);
        self.registers = min_option(self.registers, other.registers);
        self.instruction = min_option(self.instruction, other.instruction);
    }
}

fn min_option(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Adaptive hit counters driving C6's promotion decisions (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct ConcretizationCounters {
    pub per_variable: HashMap<VarId, u64>,
    pub per_instruction: HashMap<u64, u64>,
}

/// `always_concretize` / `never_concretize` / `concretize_at`, additive-only
/// within one plugin's lifetime (spec.md §4.6).
#[derive(Debug, Clone, Default)]
pub struct PolicySets {
    pub always_concretize: HashSet<VarId>,
    pub never_concretize: HashSet<VarId>,
    pub concretize_at: HashSet<u64>,
}

impl PolicySets {
    /// Merge semantics are in-place union (spec.md §4.8, §9 Open Questions:
    /// the original's `.union(...)`/`.intersection(...)` calls discard their
    /// result — a no-op bug. This resolves the documented intent as mutation
    /// rather than reproducing the bug.)
    fn merge_in_place(&mut self, other: &PolicySets) {
        self.always_concretize.extend(other.always_concretize.iter().cloned());
        self.never_concretize.extend(other.never_concretize.iter().cloned());
        self.concretize_at.extend(other.concretize_at.iter().cloned());
    }
}

/// A syscall number's hand-rolled in-accelerator implementation, invoked
/// directly against the symbolic state instead of surfacing a `SYSCALL`
/// stop (i386's quick-syscall path, spec.md §4.4). `Arc` so the table
/// survives a plugin fork without requiring hooks to be `Clone`.
pub type SyscallHook<S> = Arc<dyn Fn(&mut S) + Send + Sync>;

/// Builder for a fresh [`AcceleratorPlugin`], matching the fluent
/// `..Default` + setters style the teacher uses for its own configuration
/// types.
#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    pub cooldown: CooldownSettings,
    pub thresholds: ConcretizationThresholds,
    pub max_steps: u64,
    pub handle_transmit_syscall: bool,
    /// CGC transmit syscall number and the address its implementation lives
    /// at in the analyzed binary; only consulted when `handle_transmit_syscall`
    /// is set and the state carries a CGC-model plugin (spec.md §4.7). The
    /// original defaults `transmit_addr` to 0 and logs an error rather than
    /// failing setup when it's left unconfigured; carried forward as-is.
    pub transmit_sysno: u32,
    pub transmit_addr: u64,
    /// Suppresses the throughput-based nonunicorn cooldown (spec.md §4.7's
    /// `is_testing` check) so deterministic tests aren't penalized for slow
    /// wall-clock emulation under a debugger or CI load.
    pub testing: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            cooldown: CooldownSettings::default(),
            thresholds: ConcretizationThresholds::default(),
            max_steps: 1_000_000,
            handle_transmit_syscall: false,
            transmit_sysno: 0,
            transmit_addr: 0,
            testing: false,
        }
    }
}

impl AcceleratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cooldown(mut self, cooldown: CooldownSettings) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ConcretizationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_transmit_handling(mut self, enabled: bool) -> Self {
        self.handle_transmit_syscall = enabled;
        self
    }

    pub fn with_transmit_target(mut self, sysno: u32, addr: u64) -> Self {
        self.transmit_sysno = sysno;
        self.transmit_addr = addr;
        self
    }

    pub fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    pub fn build<S: SymbolicState>(&self, cache_key: CacheKey) -> AcceleratorPlugin<S> {
        AcceleratorPlugin {
            cache_key,
            unicount: 0,
            max_steps: self.max_steps,
            steps: 0,
            stop_reason: None,
            last_error: None,
            cooldown_settings: self.cooldown,
            countdowns: Countdowns::default(),
            thresholds: self.thresholds,
            counters: ConcretizationCounters::default(),
            policy: PolicySets::default(),
            concretized_values: HashSet::new(),
            syscall_hooks: HashMap::new(),
            handle_transmit_syscall: self.handle_transmit_syscall,
            transmit_sysno: self.transmit_sysno,
            transmit_addr: self.transmit_addr,
            testing: self.testing,
            pending_uncache: Vec::new(),
            started_at: None,
        }
    }
}

/// Attached to exactly one symbolic state; forked alongside it (spec.md §3,
/// §4.8). Owns every tunable and every piece of adaptive state the
/// accelerator needs across episode boundaries; the native emulator handle
/// itself lives in the thread-local pool (C1), never here.
pub struct AcceleratorPlugin<S: SymbolicState> {
    pub cache_key: CacheKey,
    pub unicount: u64,
    pub max_steps: u64,
    pub steps: u64,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
    pub cooldown_settings: CooldownSettings,
    pub countdowns: Countdowns,
    pub thresholds: ConcretizationThresholds,
    pub counters: ConcretizationCounters,
    pub policy: PolicySets,
    pub concretized_values: HashSet<ValueId>,
    pub syscall_hooks: HashMap<u64, SyscallHook<S>>,
    pub handle_transmit_syscall: bool,
    pub transmit_sysno: u32,
    pub transmit_addr: u64,
    pub testing: bool,
    /// Pages whose native-side cache entry must be dropped before the next
    /// `start` (spec.md §4.7 step 2).
    pub pending_uncache: Vec<u64>,
    /// Wall-clock start of the in-flight episode, used by `finish` to derive
    /// blocks/sec for the throughput-based cooldown (spec.md §4.7). Never
    /// carried across a fork — each fork's first episode times itself.
    pub started_at: Option<std::time::Instant>,
}

impl<S: SymbolicState> AcceleratorPlugin<S> {
    /// I5: records that a value's identity has already had a
    /// constraint emitted for it; returns `false` if it was already
    /// recorded (caller must then skip emitting a duplicate).
    pub fn record_concretized(&mut self, id: ValueId) -> bool {
        self.concretized_values.insert(id)
    }

    /// Copy-on-fork (spec.md §4.8): deep-copies policy sets, counters, the
    /// syscall-hook table (cheaply, via `Arc`), and cooldown state; keeps
    /// the cache key so forks share emulator-reuse lineage; resets the
    /// per-episode fields (`steps`, `stop_reason`, `last_error`) since they
    /// describe a run that hasn't happened yet in the fork.
    pub fn fork(&self) -> Self {
        Self {
            cache_key: self.cache_key,
            unicount: self.unicount,
            max_steps: self.max_steps,
            steps: 0,
            stop_reason: None,
            last_error: None,
            cooldown_settings: self.cooldown_settings,
            countdowns: self.countdowns,
            thresholds: self.thresholds,
            counters: self.counters.clone(),
            policy: self.policy.clone(),
            concretized_values: self.concretized_values.clone(),
            syscall_hooks: self.syscall_hooks.clone(),
            handle_transmit_syscall: self.handle_transmit_syscall,
            transmit_sysno: self.transmit_sysno,
            transmit_addr: self.transmit_addr,
            testing: self.testing,
            pending_uncache: self.pending_uncache.clone(),
            started_at: None,
        }
    }

    /// Merge semantics (spec.md §4.8): max cooldowns, min thresholds, union
    /// policy sets, *intersection* of the concretized-value record (only
    /// promise not to re-emit a constraint every predecessor already
    /// emitted).
    pub fn merge(&mut self, others: &[&Self]) {
        for other in others {
            self.countdowns.merge_in_place(&other.countdowns);
            self.thresholds.merge_in_place(&other.thresholds);
            self.policy.merge_in_place(&other.policy);
        }
        if !others.is_empty() {
            self.concretized_values
                .retain(|v| others.iter().all(|o| o.concretized_values.contains(v)));
        }
        self.unicount = 0;
    }
}
