use thiserror::Error;

/// Error kinds from the playback pipeline.
///
/// Mirrors the error taxonomy the spec assigns distinct recovery policies to:
/// `Startup` aborts the process, everything else is handled by the worker
/// that raised it and the loop continues or exits cleanly.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("decode error: {0}")]
    Decode(#[from] ffmpeg_next::Error),

    #[error("failed to build resampler: {0}")]
    ResampleInit(ffmpeg_next::Error),

    #[error("read error: {0}")]
    Read(String),

    #[error("queue shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
