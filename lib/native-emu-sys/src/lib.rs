//! Raw and lightly-wrapped bindings to the native instruction-level
//! emulator engine that backs the concrete-execution accelerator.
//!
//! The native library is loaded dynamically via [`libloading`] rather than
//! linked at build time, so a host without it installed degrades to "native
//! acceleration unavailable" instead of failing to link.

pub mod engine;
pub mod error;
#[cfg(feature = "test-support")]
pub mod fake;
pub mod library;
pub mod state;
pub mod types;

pub use engine::NativeEngine;
pub use error::NativeError;
pub use library::Library;
pub use state::NativeState;
pub use types::{
    EngineHandle, MemPatch, MutationIter, NativeStatePtr, StopReason, TransmitRecord, VexArch,
    VexArchInfo, VexCacheInfo,
};
