use async_trait::async_trait;

pub mod archive;
pub mod error;
pub mod ffmpeg;

use error::TransformResult;

/// One extracted still, named by its position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub data: Vec<u8>,
}

/// Source bytes in, frames out, then frames in, archive out. No side effects beyond scratch space.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    /// Samples the input at a fixed rate, ordered by position.
    async fn extract(&self, source: &[u8]) -> TransformResult<Vec<Frame>>;

    async fn pack(&self, frames: &[Frame]) -> TransformResult<Vec<u8>>;
}
