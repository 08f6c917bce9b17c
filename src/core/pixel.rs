use image::{imageops::FilterType, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelOptions {
    /// The longer side of each image is clamped to this (aspect preserved)
    /// before diffing, to bound cost and memory.
    pub max_dimension: u32,
    /// Per-channel delta a pixel must exceed to count as differing.
    /// Absorbs re-encoding noise between copies of the same image.
    pub channel_tolerance: u8,
}

impl Default for PixelOptions {
    fn default() -> Self {
        Self {
            max_dimension: 256,
            channel_tolerance: 16,
        }
    }
}

/// Fraction of pixels that differ between the two images, in [0, 1].
///
/// Each image is independently clamped to `max_dimension`, then the second
/// is resized to the first's shape so differently-sized originals can be
/// compared. A pixel counts as differing when any RGB channel deviates by
/// more than `channel_tolerance`.
pub fn diff_fraction(a: &DynamicImage, b: &DynamicImage, options: &PixelOptions) -> f64 {
    let a = clamp_to_max(a, options.max_dimension);
    let mut b = clamp_to_max(b, options.max_dimension);

    if b.dimensions() != a.dimensions() {
        b = b.resize_exact(a.width(), a.height(), FilterType::Lanczos3);
    }

    let a = a.to_rgb8();
    let b = b.to_rgb8();

    let total_pixels = (a.width() as u64) * (a.height() as u64);
    if total_pixels == 0 {
        return 0.0;
    }

    let tolerance = options.channel_tolerance as i16;
    let mut differing: u64 = 0;

    for (pixel_a, pixel_b) in a.pixels().zip(b.pixels()) {
        let max_delta = pixel_a
            .0
            .iter()
            .zip(pixel_b.0.iter())
            .map(|(&ca, &cb)| (ca as i16 - cb as i16).abs())
            .max()
            .unwrap_or(0);

        if max_delta > tolerance {
            differing += 1;
        }
    }

    differing as f64 / total_pixels as f64
}

fn clamp_to_max(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        image.clone()
    } else {
        image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    }
}
