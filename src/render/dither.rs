//! # Image Preparation for the Print Head
//!
//! The print core only accepts packed 1-bit bitmaps (1 = ink, MSB =
//! leftmost dot, width a multiple of 8). [`ImageEncoder`] produces one from
//! any decoded image:
//!
//! 1. Convert to 8-bit grayscale
//! 2. Fit to the head: wider images are scaled down to the head width,
//!    narrower ones are centered on a white strip of that width
//! 3. Optionally invert
//! 4. Dither to black/white with the chosen [`DitheringAlgorithm`]
//! 5. Pack rows, padding the last byte with paper
//!
//! ## Intensity Convention
//!
//! Dithering works on ink intensity, `1.0 - luma / 255`: 0.0 is paper,
//! 1.0 is solid black.
//!
//! ## Ordered Dithering
//!
//! Each dot is compared against a tiled 8x8 Bayer threshold:
//! `threshold = (BAYER8[y % 8][x % 8] + 0.5) / 64`. The half-step offset
//! keeps solid black always printing and pure white never printing.
//!
//! ## Example
//!
//! ```
//! use coreprint::render::dither::pack_row;
//!
//! let row = [true, true, false, false, true, false, true, false];
//! assert_eq!(pack_row(&row), vec![0xCA]);
//! ```

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

use crate::error::Result;
use crate::printer::PrinterConfig;
use crate::protocol::raster::PrinterBitmap;

/// Bayer 8x8 threshold matrix, values 0..=63.
pub const BAYER8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// How grayscale is reduced to dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitheringAlgorithm {
    /// Plain 50% threshold
    None,
    /// Ordered 8x8 Bayer screen
    #[default]
    Bayer,
    /// Error diffusion to 4 neighbors
    FloydSteinberg,
    /// Error diffusion to 6 neighbors, 3/4 of the error kept
    Atkinson,
}

impl FromStr for DitheringAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "threshold" => Ok(Self::None),
            "bayer" | "ordered" => Ok(Self::Bayer),
            "floyd-steinberg" | "floyd_steinberg" | "fs" => Ok(Self::FloydSteinberg),
            "atkinson" => Ok(Self::Atkinson),
            other => Err(format!("unknown dithering algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for DitheringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Bayer => "bayer",
            Self::FloydSteinberg => "floyd-steinberg",
            Self::Atkinson => "atkinson",
        })
    }
}

/// Ordered-dither threshold at a dot position, in (0, 1).
#[inline]
pub fn threshold(x: usize, y: usize) -> f32 {
    (BAYER8[y & 7][x & 7] as f32 + 0.5) / 64.0
}

/// Ordered-dither decision for one dot.
///
/// ```
/// use coreprint::render::dither::should_print;
///
/// assert!(should_print(3, 5, 1.0));
/// assert!(!should_print(3, 5, 0.0));
/// ```
#[inline]
pub fn should_print(x: usize, y: usize, intensity: f32) -> bool {
    intensity > threshold(x, y)
}

/// Pack one row of dots, MSB first. A partial last byte is padded with
/// paper (0) bits.
pub fn pack_row(dots: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; dots.len().div_ceil(8)];
    for (i, _) in dots.iter().enumerate().filter(|(_, ink)| **ink) {
        bytes[i / 8] |= 0x80 >> (i % 8);
    }
    bytes
}

/// Reduce an ink-intensity field (row-major, `width * height`) to dots.
pub fn dither(intensity: &[f32], width: usize, height: usize, algorithm: DitheringAlgorithm) -> Vec<bool> {
    debug_assert_eq!(intensity.len(), width * height);
    match algorithm {
        DitheringAlgorithm::None => intensity.iter().map(|&v| v > 0.5).collect(),
        DitheringAlgorithm::Bayer => intensity
            .iter()
            .enumerate()
            .map(|(i, &v)| should_print(i % width.max(1), i / width.max(1), v))
            .collect(),
        DitheringAlgorithm::FloydSteinberg => diffuse(
            intensity,
            width,
            height,
            &[(1, 0, 7.0 / 16.0), (-1, 1, 3.0 / 16.0), (0, 1, 5.0 / 16.0), (1, 1, 1.0 / 16.0)],
        ),
        DitheringAlgorithm::Atkinson => diffuse(
            intensity,
            width,
            height,
            &[
                (1, 0, 1.0 / 8.0),
                (2, 0, 1.0 / 8.0),
                (-1, 1, 1.0 / 8.0),
                (0, 1, 1.0 / 8.0),
                (1, 1, 1.0 / 8.0),
                (0, 2, 1.0 / 8.0),
            ],
        ),
    }
}

/// Error diffusion over `(dx, dy, weight)` neighbor offsets.
fn diffuse(intensity: &[f32], width: usize, height: usize, kernel: &[(isize, usize, f32)]) -> Vec<bool> {
    let mut field = intensity.to_vec();
    let mut dots = vec![false; field.len()];

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let ink = field[i] > 0.5;
            dots[i] = ink;
            let error = field[i] - if ink { 1.0 } else { 0.0 };

            for &(dx, dy, weight) in kernel {
                let nx = x as isize + dx;
                let ny = y + dy;
                if nx < 0 || nx as usize >= width || ny >= height {
                    continue;
                }
                field[ny * width + nx as usize] += error * weight;
            }
        }
    }
    dots
}

// ============================================================================
// ENCODER
// ============================================================================

/// Turns decoded images into printer bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    printer: PrinterConfig,
    algorithm: DitheringAlgorithm,
    invert: bool,
    auto_resize: bool,
}

impl ImageEncoder {
    pub fn new(printer: PrinterConfig) -> Self {
        Self {
            printer,
            algorithm: DitheringAlgorithm::default(),
            invert: false,
            auto_resize: true,
        }
    }

    pub fn with_algorithm(mut self, algorithm: DitheringAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Swap light and dark before dithering.
    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Keep the source width (padded to a byte) instead of fitting the head.
    pub fn with_auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = auto_resize;
        self
    }

    /// Grayscale, fit, dither and pack `image`.
    pub fn encode_for_printer(&self, image: &DynamicImage) -> Result<PrinterBitmap> {
        let mut gray = image.to_luma8();
        if self.auto_resize {
            gray = fit_to_width(gray, u32::from(self.printer.width_dots));
        }
        if self.invert {
            imageops::invert(&mut gray);
        }

        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let intensity: Vec<f32> = gray.pixels().map(|p| 1.0 - p[0] as f32 / 255.0).collect();
        let dots = dither(&intensity, width, height, self.algorithm);

        let padded_width = width.div_ceil(8) * 8;
        let mut data = Vec::with_capacity(padded_width / 8 * height);
        if width > 0 {
            for row in dots.chunks(width) {
                data.extend(pack_row(row));
            }
        }

        debug!(
            source_width = image.width(),
            source_height = image.height(),
            width = padded_width,
            height,
            algorithm = %self.algorithm,
            "image encoded for printer"
        );
        PrinterBitmap::new(padded_width, height, data)
    }
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(PrinterConfig::default())
    }
}

/// Scale down to `target` wide, or center on a white strip of that width.
fn fit_to_width(gray: GrayImage, target: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == target || width == 0 || height == 0 {
        return gray;
    }

    if width > target {
        let scaled_height = ((height as u64 * target as u64) / width as u64).max(1) as u32;
        return imageops::resize(&gray, target, scaled_height, FilterType::Lanczos3);
    }

    let mut canvas = GrayImage::from_pixel(target, height, Luma([255]));
    imageops::overlay(&mut canvas, &gray, i64::from((target - width) / 2), 0);
    canvas
}

// ============================================================================
// TESTS
// ============================================================================
