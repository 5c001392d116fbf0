//! Image transformation pipeline (spec §2, §4.5–§4.7): compositing,
//! derivative generation, and manifest assembly. Pure, storage-agnostic
//! functions — callers in `processor::stages` handle uploads and key
//! generation so this module stays swappable (§9 "Sharp-specific pipeline
//! chaining" -> `ImagePipeline`-shaped free functions).

pub mod compositor;
pub mod derivatives;
pub mod encode;
pub mod manifest;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("composite failed: {0}")]
    CompositeFailed(String),

    #[error("derivative generation failed: {0}")]
    DerivativeFailed(String),

    #[error("manifest assembly failed: {0}")]
    ManifestFailed(String),

    #[error("image encode/decode error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
