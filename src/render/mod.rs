//! # Rendering Module
//!
//! Image-side preparation: everything that happens to a picture before it
//! becomes a [`PrinterBitmap`](crate::protocol::raster::PrinterBitmap).
//!
//! ## Modules
//!
//! - [`dither`]: grayscale fitting, dithering and row packing
//!
//! ## Usage Example
//!
//! ```
//! use coreprint::render::{DitheringAlgorithm, ImageEncoder};
//! use image::{DynamicImage, GrayImage, Luma};
//!
//! let photo = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 40, Luma([90])));
//! let bitmap = ImageEncoder::default()
//!     .with_algorithm(DitheringAlgorithm::Atkinson)
//!     .encode_for_printer(&photo)
//!     .unwrap();
//!
//! assert_eq!(bitmap.width(), 384);
//! assert_eq!(bitmap.height(), 40);
//! ```

pub mod dither;

pub use dither::{DitheringAlgorithm, ImageEncoder};
