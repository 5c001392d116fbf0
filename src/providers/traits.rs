//! Capability interfaces for the two pluggable external collaborators named
//! in spec §9 ("Factory / singleton providers"): background removal and
//! background synthesis. A concrete variant is wired once at process
//! startup from configuration (§9 "process-wide configuration").

use async_trait::async_trait;
use image::{GrayImage, RgbImage, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    RequestFailed(String),
    #[error("provider returned an undecodable image: {0}")]
    DecodeFailed(String),
    #[error("provider returned no usable output")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Output of a segmentation call: cutout (RGBA, transparent background) and
/// its companion binary mask, plus the provider's reported cost (§2, §3).
pub struct SegmentationOutput {
    pub cutout: RgbaImage,
    pub mask: GrayImage,
    pub cost_usd: f64,
    /// Whether the provider's underlying image actually carried an alpha
    /// channel (PNG/WebP) as opposed to being forced to RGBA from an opaque
    /// source (JPEG) — the compositor's step 2 check (§4.5) needs the real
    /// answer, not the type-level guarantee every `RgbaImage` trivially has.
    pub has_alpha: bool,
}

/// External background-removal adapter (§2 SegmentationClient).
#[async_trait]
pub trait SegmentationProvider: Send + Sync {
    async fn remove_background(&self, source_url: &str, source_bytes: &[u8]) -> Result<SegmentationOutput>;
}

/// Produces N themed backgrounds per job (§2 BackgroundSynthesizer). The
/// reference implementation uses solid/gradient fills; the interface
/// permits an AI generator.
#[async_trait]
pub trait BackgroundProvider: Send + Sync {
    async fn generate(
        &self,
        theme: &str,
        count: usize,
        width: u32,
        height: u32,
    ) -> Result<Vec<(RgbImage, f64)>>;

    /// Design-note hook (`getThemePrompt`) kept for AI-backed variants that
    /// need a text prompt per theme; fill-based providers ignore it.
    fn theme_prompt(&self, theme: &str) -> String {
        format!("a clean, evenly lit {theme} product background")
    }
}
