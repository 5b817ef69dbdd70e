use std::fmt;

/// Opaque identity of a symbolic value, stable across solver simplification.
///
/// spec.md §9 Design Notes: "implementations must pick a stable identity
/// that is hashable and does not change as the solver simplifies (the
/// original source keyed on a per-value hash; a content-addressed id is a
/// reasonable replacement)". Left as an opaque `u64` so a real solver
/// backend can plug in whatever is cheap to compute (a content hash, an AST
/// node pointer, an interning table index) without this crate caring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u64);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{:#x}", self.0)
    }
}

/// Opaque identity of a free variable within a symbolic value (what the
/// original calls a variable *name*, e.g. `reg_rax_12_64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub String);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
