//! Derivative generation (spec §4.6): for each composite, produce the
//! configured size × format matrix. Per-unit failures are collected rather
//! than propagated — the caller only fails the stage if a composite ends
//! up with zero derivatives (§4.4 "Partial success tolerance").

use image::DynamicImage;

use super::encode::{self, Fit, OutputFormat};

#[derive(Debug, Clone, Copy)]
struct SizeSpec {
    name: &'static str,
    width: u32,
    height: u32,
    fit: Fit,
}

/// §4.6 "Sizes (default)".
const SIZES: &[SizeSpec] = &[
    SizeSpec {
        name: "hero",
        width: 2000,
        height: 2000,
        fit: Fit::Inside,
    },
    SizeSpec {
        name: "pdp",
        width: 1200,
        height: 1200,
        fit: Fit::Cover,
    },
    SizeSpec {
        name: "thumb",
        width: 400,
        height: 400,
        fit: Fit::Cover,
    },
];

#[derive(Debug, Clone, Copy)]
struct FormatSpec {
    format: OutputFormat,
    quality: u8,
}

/// §4.6 "Formats (default)".
const FORMATS: &[FormatSpec] = &[
    FormatSpec {
        format: OutputFormat::Jpeg,
        quality: 90,
    },
    FormatSpec {
        format: OutputFormat::Webp,
        quality: 85,
    },
    FormatSpec {
        format: OutputFormat::Avif,
        quality: 80,
    },
];

pub struct DerivativeUnit {
    pub size: &'static str,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DerivativeError {
    pub size: &'static str,
    pub format: &'static str,
    pub message: String,
}

/// Attempts every (size, format) pair for one composite. Returns the
/// produced units plus a report of any pair that failed to encode; the
/// floor of "at least one derivative per composite" (§4.4, §8 property 10)
/// is enforced by the caller, not here.
pub fn generate(composite: &DynamicImage) -> (Vec<DerivativeUnit>, Vec<DerivativeError>) {
    let mut units = Vec::with_capacity(SIZES.len() * FORMATS.len());
    let mut errors = Vec::new();

    for size in SIZES {
        let resized = encode::resize_fit(composite, size.width, size.height, size.fit);
        let (w, h) = (resized.width(), resized.height());

        for fmt in FORMATS {
            match encode::encode(&resized, fmt.format, fmt.quality) {
                Ok(bytes) => units.push(DerivativeUnit {
                    size: size.name,
                    format: fmt.format,
                    width: w,
                    height: h,
                    quality: fmt.quality,
                    bytes,
                }),
                Err(e) => errors.push(DerivativeError {
                    size: size.name,
                    format: fmt.format.name(),
                    message: e.to_string(),
                }),
            }
        }
    }

    (units, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(1600, 1600, Rgb([100, 120, 140])))
    }

    #[test]
    fn produces_full_matrix_for_one_composite() {
        let (units, errors) = generate(&sample());
        assert_eq!(units.len(), SIZES.len() * FORMATS.len());
        assert!(errors.is_empty());
    }

    #[test]
    fn hero_preserves_aspect_ratio_under_long_edge_cap() {
        let wide = DynamicImage::ImageRgb8(RgbImage::from_pixel(4000, 1000, Rgb([0, 0, 0])));
        let (units, _) = generate(&wide);
        let hero = units.iter().find(|u| u.size == "hero").unwrap();
        assert!(hero.width <= 2000 && hero.height <= 2000);
        assert_eq!(hero.width, 2000);
        assert_eq!(hero.height, 500);
    }
}
