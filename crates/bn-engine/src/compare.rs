//! Pixel-level comparison of two avatar frames.
//!
//! Both frames are resampled (aspect ignored) to the smaller width and the
//! smaller height of the pair, then every pixel pair is tested against a
//! perceptual colour tolerance in YIQ space.

use std::borrow::Cow;

use bn_core::{AvatarThresholds, DetectionResult, ViolationThreshold, ViolationType};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Per-pixel tolerance as a fraction of the maximum YIQ distance.
pub const PIXEL_TOLERANCE: f64 = 0.1;

/// Largest possible squared YIQ delta between two RGB colours.
const MAX_YIQ_DELTA: f64 = 35215.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComparison {
    pub mismatched_pixels: u64,
    pub total_pixels: u64,
}

impl FrameComparison {
    /// Share of pixels outside the tolerance, in percent. Identical frames
    /// score 0; frames with nothing to compare score 100.
    pub fn difference_percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 100.0;
        }
        self.mismatched_pixels as f64 * 100.0 / self.total_pixels as f64
    }

    /// Share of pixels within the tolerance, in percent.
    pub fn match_percent(&self) -> f64 {
        100.0 - self.difference_percent()
    }

    /// Grades the match percentage against the avatar thresholds.
    pub fn classify(&self, thresholds: &AvatarThresholds) -> DetectionResult {
        let score = self.match_percent();
        if score >= thresholds.hard {
            DetectionResult::new(ViolationType::Avatar, ViolationThreshold::Hard)
        } else if score >= thresholds.soft {
            DetectionResult::new(ViolationType::Avatar, ViolationThreshold::Soft)
        } else {
            DetectionResult::NONE
        }
    }
}

pub fn compare_frames(a: &RgbaImage, b: &RgbaImage) -> FrameComparison {
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let a = fit(a, width, height);
    let b = fit(b, width, height);

    let max_delta = MAX_YIQ_DELTA * PIXEL_TOLERANCE * PIXEL_TOLERANCE;
    let mismatched_pixels = a
        .pixels()
        .zip(b.pixels())
        .filter(|(p, q)| color_delta(p, q) > max_delta)
        .count() as u64;

    FrameComparison {
        mismatched_pixels,
        total_pixels: u64::from(width) * u64::from(height),
    }
}

pub fn compare_and_classify(a: &RgbaImage, b: &RgbaImage, thresholds: &AvatarThresholds) -> DetectionResult {
    compare_frames(a, b).classify(thresholds)
}

fn fit(img: &RgbaImage, width: u32, height: u32) -> Cow<'_, RgbaImage> {
    if img.dimensions() == (width, height) {
        Cow::Borrowed(img)
    } else {
        Cow::Owned(imageops::resize(img, width, height, FilterType::Lanczos3))
    }
}

/// Squared YIQ distance, translucent pixels blended over white first.
fn color_delta(p: &Rgba<u8>, q: &Rgba<u8>) -> f64 {
    if p == q {
        return 0.0;
    }
    let [r1, g1, b1] = blend(p);
    let [r2, g2, b2] = blend(q);

    let y = rgb2y(r1, g1, b1) - rgb2y(r2, g2, b2);
    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);

    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

fn blend(px: &Rgba<u8>) -> [f64; 3] {
    let [r, g, b, a] = px.0;
    let alpha = f64::from(a) / 255.0;
    let mix = |c: u8| 255.0 + (f64::from(c) - 255.0) * alpha;
    [mix(r), mix(g), mix(b)]
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}
