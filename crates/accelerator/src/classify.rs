//! C2: per-value classification — pass through, concretize, or refuse
//! (spec.md §4.2).

use crate::plugin::AcceleratorPlugin;
use state_api::{SymbolicState, SymbolicValue};

/// Where a value being classified came from; the classifier's own policy
/// doesn't depend on this, but callers (C3, C4) branch on it afterward: a
/// still-symbolic memory byte gets tainted, a still-symbolic register is
/// only tolerated under `sym_regs_support`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Register,
    Memory,
}

#[derive(Debug, Clone)]
pub enum Classification<V> {
    Value(V),
    Refuse,
}

impl<V> Classification<V> {
    pub fn is_refused(&self) -> bool {
        matches!(self, Classification::Refuse)
    }
}

/// Ports `_process_value`/`_symbolic_passthrough`: annotation refusal first,
/// then concrete passthrough, then the aggressive/never/always/concretize_at
/// policy chain (spec.md §4.2 steps 1–7).
pub fn classify<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    ip: u64,
    value: &S::Value,
) -> Classification<S::Value> {
    if value.has_annotations() {
        return Classification::Refuse;
    }
    if !value.is_symbolic() {
        return Classification::Value(value.clone());
    }
    if state.options().aggressive_concretization {
        return Classification::Value(concretize(plugin, state, ip, value));
    }

    let free = value.free_variables();
    if free.intersection(&plugin.policy.never_concretize).next().is_some() {
        return Classification::Value(value.clone());
    }
    if free.is_subset(&plugin.policy.always_concretize) {
        return Classification::Value(concretize(plugin, state, ip, value));
    }
    if plugin.policy.concretize_at.contains(&ip) {
        return Classification::Value(concretize(plugin, state, ip, value));
    }

    Classification::Value(value.clone())
}

/// Evaluates one concrete model of `value` and, the first time this value's
/// identity is seen (I5), asserts equality as an aggressive-concretization
/// constraint keyed by `ip`.
fn concretize<S: SymbolicState>(
    plugin: &mut AcceleratorPlugin<S>,
    state: &mut S,
    ip: u64,
    value: &S::Value,
) -> S::Value {
    let concrete = state.solver().eval_single_model(value);
    if plugin.record_concretized(value.identity()) {
        let constraint = value
            .build_equality(&concrete)
            .annotate_aggressive_concretization(ip);
        state.add_constraint(constraint);
    }
    concrete
}
