#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    #[error("failed to load native emulator library: {0}")]
    Load(#[from] libloading::Error),

    #[error("symbol \"{0}\" missing from native emulator library")]
    MissingSymbol(String),

    #[error("native start() returned error code {0}")]
    StartFailed(i32),

    #[error("native emulator reported unknown stop code {0}")]
    UnknownStopCode(i32),
}
