use thiserror::Error;

pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg could not decode the input (exit code {exit_code:?}): {stderr}")]
    FfmpegFailed { exit_code: Option<i32>, stderr: String },

    #[error("Input produced no frames")]
    NoFrames,

    #[error("Invalid frame name: {0}")]
    InvalidFrameName(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
