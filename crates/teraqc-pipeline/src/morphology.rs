//! Morphological closing with elliptical and rectangular elements.
//!
//! In-plane operations delegate to `imageproc::morphology`; the element
//! is rasterized here so elliptical kernels match the usual
//! `MORPH_ELLIPSE` shape rather than a Euclidean disk. Closing along the
//! depth axis has no `imageproc` counterpart and is done on the volume.

use image::{GrayImage, Luma};
use imageproc::morphology::Mask;
use ndarray::{Array3, Axis};

/// Shape of a structuring element.
///
/// Sizes are validated by [`crate::PipelineConfig::validate`] to be odd
/// and at most 511, the largest element `imageproc` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuringElement {
    /// Filled ellipse inscribed in a `size x size` box.
    Ellipse {
        /// Box side length.
        size: u32,
    },
    /// Filled `width x height` rectangle.
    Rect {
        /// Horizontal extent.
        width: u32,
        /// Vertical extent.
        height: u32,
    },
}

impl StructuringElement {
    /// Rasterize the element: 255 inside, 0 outside.
    #[must_use]
    pub fn to_image(self) -> GrayImage {
        match self {
            Self::Ellipse { size } => ellipse_image(size),
            Self::Rect { width, height } => {
                GrayImage::from_pixel(width.max(1), height.max(1), Luma([255]))
            }
        }
    }

    /// Build the `imageproc` mask, anchored at the element center.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_mask(self) -> Mask {
        let image = self.to_image();
        // Extents are capped at 511, so the centers fit in a byte.
        let cx = (image.width() / 2).min(255) as u8;
        let cy = (image.height() / 2).min(255) as u8;
        Mask::from_image(&image, cx, cy)
    }
}

/// Rows of a `size x size` ellipse: for row offset `dy` the half-width is
/// `round(r * sqrt(1 - (dy / r)^2))`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ellipse_image(size: u32) -> GrayImage {
    let size = size.max(1);
    let r = i64::from(size / 2);
    let mut image = GrayImage::new(size, size);
    if r == 0 {
        image.put_pixel(0, 0, Luma([255]));
        return image;
    }
    let r_f = r as f64;
    for row in 0..size {
        let dy = i64::from(row) - r;
        let span = (r_f * r_f - (dy * dy) as f64).max(0.0).sqrt();
        let dx = span.round() as i64;
        let start = (r - dx).max(0);
        let end = (r + dx + 1).min(i64::from(size));
        for col in start..end {
            image.put_pixel(col as u32, row, Luma([255]));
        }
    }
    image
}

/// Grayscale closing (dilate then erode) of one slice.
#[must_use]
pub fn close(image: &GrayImage, element: StructuringElement) -> GrayImage {
    imageproc::morphology::grayscale_close(image, &element.to_mask())
}

/// Grayscale closing of every `(y, x)` column of a volume along `z`.
///
/// The window is `length` voxels centered on each position; samples
/// outside the volume are ignored.
#[must_use]
pub fn close_depth(volume: &Array3<u8>, length: u32) -> Array3<u8> {
    let radius = (length / 2) as usize;
    let mut out = volume.clone();
    if radius == 0 {
        return out;
    }
    for mut lane in out.lanes_mut(Axis(0)) {
        let column = lane.to_vec();
        let closed = sweep(&sweep(&column, radius, u8::max), radius, u8::min);
        for (dst, src) in lane.iter_mut().zip(closed) {
            *dst = src;
        }
    }
    out
}

/// Sliding-window reduction with a clipped window.
fn sweep(values: &[u8], radius: usize, pick: fn(u8, u8) -> u8) -> Vec<u8> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            values[lo..hi].iter().copied().reduce(pick).unwrap_or(0)
        })
        .collect()
}
