//! C6: adaptive concretization policy — threshold counters and promotion
//! into `always_concretize` / `concretize_at` (spec.md §4.6).

use crate::plugin::AcceleratorPlugin;
use state_api::SymbolicState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerSide {
    Memory,
    Register,
}

/// Called by C7 when a `symbolic_reg`/`symbolic_mem` stop is observed,
/// with `blocker` being the one-byte value at the stopping offset.
/// `threshold_concretization_enabled` is `state.options().threshold_concretization`;
/// threaded in rather than read from `state` here to keep this free of a
/// `SymbolicState` instance (the counters only need the value's free
/// variables, not the state itself).
pub fn report_symbolic_blocker<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    threshold_concretization_enabled: bool,
    ip: u64,
    blocker: &S::Value,
    side: BlockerSide,
) {
    use state_api::SymbolicValue;

    if !threshold_concretization_enabled {
        return;
    }

    if let Some(threshold) = plugin.thresholds.instruction {
        let count = plugin.counters.per_instruction.entry(ip).or_insert(0);
        *count += 1;
        if *count >= threshold {
            plugin.policy.concretize_at.insert(ip);
        }
    }

    let side_threshold = match side {
        BlockerSide::Memory => plugin.thresholds.memory,
        BlockerSide::Register => plugin.thresholds.registers,
    };
    let Some(threshold) = side_threshold else {
        return;
    };

    for var in blocker.free_variables() {
        let count = plugin.counters.per_variable.entry(var.clone()).or_insert(0);
        *count += 1;
        if *count >= threshold {
            plugin.policy.always_concretize.insert(var);
        }
    }
}
