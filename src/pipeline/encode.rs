//! Shared resize/encode helpers used by both the compositor (§4.5) and the
//! derivative engine (§4.6), so the two stages agree on fit semantics and
//! encoder defaults.

use image::{DynamicImage, GenericImageView, ImageEncoder, imageops::FilterType};

use super::{PipelineError, Result};

/// How a source image is fit into a target box (§4.5 step 4, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Fill the box exactly, cropping the overflow (default for backgrounds
    /// and most derivative sizes).
    Cover,
    /// Fit entirely inside the box, preserving aspect ratio, no crop.
    Inside,
}

/// Output raster format (§4.6 "Formats").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn ext(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }
}

/// Resize `img` to fit `(target_w, target_h)` using lanczos-3, honoring
/// `fit` (§4.5 step 4, §4.6 "Kernel: lanczos-3, upscaling permitted").
pub fn resize_fit(img: &DynamicImage, target_w: u32, target_h: u32, fit: Fit) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || target_w == 0 || target_h == 0 {
        return img.clone();
    }

    match fit {
        Fit::Inside => {
            let scale = f64::min(target_w as f64 / w as f64, target_h as f64 / h as f64);
            let new_w = (w as f64 * scale).round().max(1.0) as u32;
            let new_h = (h as f64 * scale).round().max(1.0) as u32;
            img.resize_exact(new_w, new_h, FilterType::Lanczos3)
        }
        Fit::Cover => {
            let scale = f64::max(target_w as f64 / w as f64, target_h as f64 / h as f64);
            let scaled_w = (w as f64 * scale).round().max(1.0) as u32;
            let scaled_h = (h as f64 * scale).round().max(1.0) as u32;
            let resized = img.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3);
            let x = (scaled_w.saturating_sub(target_w)) / 2;
            let y = (scaled_h.saturating_sub(target_h)) / 2;
            resized.crop_imm(x, y, target_w.min(scaled_w), target_h.min(scaled_h))
        }
    }
}

/// Encode `img` to `format` at `quality` (§4.5 step 8, §4.6 "Formats").
///
/// The `image` crate's WebP encoder is lossless-only, so `quality` has no
/// effect for that format; kept in the signature so callers and the
/// manifest record a consistent quality figure regardless of encoder.
pub fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    match format {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            encoder
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(PipelineError::Image)?;
        }
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
            encoder
                .write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(PipelineError::Image)?;
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            // "effort" (§4.6) maps inversely onto the encoder's speed knob:
            // a fixed mid-range speed balances encode time against size for
            // a background job where nothing blocks on it interactively.
            const AVIF_SPEED: u8 = 6;
            let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
                &mut buf,
                AVIF_SPEED,
                quality,
            );
            encoder
                .write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(PipelineError::Image)?;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([120, 140, 160])))
    }

    #[test]
    fn cover_fit_produces_exact_target_dimensions() {
        let img = sample(800, 400);
        let fitted = resize_fit(&img, 200, 200, Fit::Cover);
        assert_eq!(fitted.dimensions(), (200, 200));
    }

    #[test]
    fn inside_fit_preserves_aspect_and_bounds() {
        let img = sample(4000, 2000);
        let fitted = resize_fit(&img, 2000, 2000, Fit::Inside);
        let (w, h) = fitted.dimensions();
        assert!(w <= 2000 && h <= 2000);
        assert_eq!(w, 2000);
        assert_eq!(h, 1000);
    }

    #[test]
    fn jpeg_round_trips_through_decode() {
        let img = sample(32, 32);
        let bytes = encode(&img, OutputFormat::Jpeg, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (32, 32));
    }
}
