//! Reference provider implementations: a segmentation provider that treats
//! the decoded source image as its own cutout (full-alpha mask), and a
//! background synthesizer that fills with solid colors / linear gradients.
//! Used in development, tests, and whenever no external vendor is
//! configured.

use async_trait::async_trait;
use image::{GenericImageView, GrayImage, Rgb, RgbImage, RgbaImage};

use super::traits::{BackgroundProvider, ProviderError, Result, SegmentationOutput, SegmentationProvider};

/// Cost reported per call, modeling a flat per-image vendor charge.
const MOCK_SEGMENTATION_COST_USD: f64 = 0.01;
const MOCK_BACKGROUND_COST_USD: f64 = 0.002;

pub struct MockSegmentationProvider;

#[async_trait]
impl SegmentationProvider for MockSegmentationProvider {
    async fn remove_background(&self, _source_url: &str, source_bytes: &[u8]) -> Result<SegmentationOutput> {
        let decoded = image::load_from_memory(source_bytes)
            .map_err(|e| ProviderError::DecodeFailed(e.to_string()))?;

        let cutout = decoded.to_rgba8();
        let (width, height) = cutout.dimensions();
        let mask = GrayImage::from_pixel(width, height, image::Luma([255u8]));

        Ok(SegmentationOutput {
            cutout,
            mask,
            cost_usd: MOCK_SEGMENTATION_COST_USD,
            // The mock treats the whole source frame as foreground rather
            // than actually keying out a background, but it still reports a
            // structurally valid RGBA cutout — matching what a real vendor
            // call is contractually required to return.
            has_alpha: true,
        })
    }
}

/// Palette rotated across variant index so repeated backgrounds for a job
/// are visually distinct without requiring an AI call.
const PALETTE: &[(u8, u8, u8)] = &[
    (245, 245, 240),
    (230, 225, 210),
    (210, 220, 225),
    (225, 210, 220),
];

pub struct MockBackgroundProvider;

#[async_trait]
impl BackgroundProvider for MockBackgroundProvider {
    async fn generate(
        &self,
        _theme: &str,
        count: usize,
        width: u32,
        height: u32,
    ) -> Result<Vec<(RgbImage, f64)>> {
        if count == 0 {
            return Err(ProviderError::Empty);
        }

        let mut out = Vec::with_capacity(count);
        for variant in 0..count {
            let (r, g, b) = PALETTE[variant % PALETTE.len()];
            let image = gradient_fill(width, height, (r, g, b));
            out.push((image, MOCK_BACKGROUND_COST_USD));
        }
        Ok(out)
    }
}

/// Vertical gradient from the base color to a slightly darker shade, giving
/// composites a studio-backdrop look without any external dependency.
fn gradient_fill(width: u32, height: u32, base: (u8, u8, u8)) -> RgbImage {
    let mut img = RgbImage::new(width.max(1), height.max(1));
    let (r, g, b) = base;
    let darken = |c: u8, t: f32| (c as f32 * (1.0 - 0.15 * t)) as u8;

    for y in 0..img.height() {
        let t = y as f32 / (img.height().max(1) as f32);
        let pixel = Rgb([darken(r, t), darken(g, t), darken(b, t)]);
        for x in 0..img.width() {
            img.put_pixel(x, y, pixel);
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_generation_produces_requested_count() {
        let provider = MockBackgroundProvider;
        let result = provider.generate("default", 2, 100, 100).await.unwrap();
        assert_eq!(result.len(), 2);
        for (img, cost) in &result {
            assert_eq!(img.dimensions(), (100, 100));
            assert!(*cost > 0.0);
        }
    }

    #[tokio::test]
    async fn zero_backgrounds_is_an_error() {
        let provider = MockBackgroundProvider;
        assert!(provider.generate("default", 0, 100, 100).await.is_err());
    }
}
