use state_api::Architecture;

/// Errors with no defined recovery (spec.md §7): everything else — zero
/// page, segfault, mixed permissions, symbolic blockers — is reported as a
/// stop reason, not an `Err`, because a stop is ordinary control flow here.
#[derive(Debug, thiserror::Error)]
pub enum AcceleratorError {
    #[error("no native emulator mode for architecture {0:?}")]
    UnsupportedArchitecture(Architecture),

    #[error("register {register:?} is symbolic and sym_regs_support is off")]
    SymbolicInputRefused { register: &'static str },

    #[error("native emulator library is unavailable")]
    NativeLibraryUnavailable,

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    State(#[from] state_api::StateError),

    #[error(transparent)]
    Native(#[from] native_emu_sys::NativeError),
}
