/// Errors the symbolic executor's own memory/solver plumbing can raise back
/// into the accelerator. Distinct from `accelerator::AcceleratorError`: this
/// crate only describes what can go wrong *inside* the collaborator, not
/// what the accelerator does about it.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("segfault while loading memory at {addr:#x}")]
    Segfault { addr: u64 },

    #[error("memory error: {0}")]
    Memory(String),

    #[error("solver error: {0}")]
    Solver(String),
}
