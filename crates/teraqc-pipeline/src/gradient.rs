//! Edge enhancement: closing followed by Sobel gradient magnitude.
//!
//! The Sobel family is built for any odd aperture: the smoothing kernel
//! is the binomial row of length `ksize` and the derivative kernel is the
//! binomial row of length `ksize - 2` convolved with `[-1, 0, 1]`.
//! Aperture 1 is the bare central difference. Both passes run through
//! `imageproc`'s separable filter on an `f32` copy of the slice so the
//! signed responses are not clamped.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::separable_filter;

use crate::morphology::{self, StructuringElement};
use crate::volume::scale_to_byte;

/// Real-valued gradient magnitude of one slice.
pub type GradientImage = Image<Luma<f32>>;

/// Smoothing and derivative kernels for a Sobel aperture.
///
/// Returns `(smooth, derivative)`.
#[must_use]
pub fn sobel_kernels(ksize: u32) -> (Vec<f32>, Vec<f32>) {
    const CENTRAL: [f32; 3] = [-1.0, 0.0, 1.0];
    if ksize <= 1 {
        return (vec![1.0], CENTRAL.to_vec());
    }
    let n = ksize as usize;
    (binomial(n), convolve_full(&binomial(n - 2), &CENTRAL))
}

/// Row `n - 1` of Pascal's triangle.
fn binomial(n: usize) -> Vec<f32> {
    let mut row = vec![1.0];
    for _ in 1..n {
        row = convolve_full(&row, &[1.0, 1.0]);
    }
    row
}

fn convolve_full(a: &[f32], b: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Horizontal and vertical Sobel responses of a slice.
///
/// Returns `(gx, gy)`; border samples are replicated.
#[must_use]
pub fn sobel(image: &GrayImage, ksize: u32) -> (GradientImage, GradientImage) {
    let src: GradientImage = Image::from_fn(image.width(), image.height(), |x, y| {
        Luma([f32::from(image.get_pixel(x, y).0[0])])
    });
    let (smooth, deriv) = sobel_kernels(ksize);
    let gx = separable_filter(&src, &deriv, &smooth);
    let gy = separable_filter(&src, &smooth, &deriv);
    (gx, gy)
}

/// Euclidean norm of the Sobel responses.
#[must_use]
pub fn sobel_magnitude(image: &GrayImage, ksize: u32) -> GradientImage {
    let (gx, gy) = sobel(image, ksize);
    Image::from_fn(image.width(), image.height(), |x, y| {
        Luma([gx.get_pixel(x, y).0[0].hypot(gy.get_pixel(x, y).0[0])])
    })
}

/// Close a slice with an elliptical element, then take its gradient
/// magnitude.
#[must_use]
pub fn enhance_edges(slice: &GrayImage, closing_size: u32, ksize: u32) -> GradientImage {
    let closed = morphology::close(slice, StructuringElement::Ellipse { size: closing_size });
    sobel_magnitude(&closed, ksize)
}

/// Largest magnitude across every slice, zero for an empty stack.
#[must_use]
pub fn global_max(gradients: &[GradientImage]) -> f32 {
    gradients
        .iter()
        .flat_map(|g| g.as_raw().iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0, f32::max)
}

/// Scale every slice to 8 bits by the global maximum, truncating.
///
/// An all-zero response stays all zero.
#[must_use]
pub fn quantize_stack(gradients: &[GradientImage]) -> Vec<GrayImage> {
    let max = f64::from(global_max(gradients));
    gradients
        .iter()
        .map(|g| {
            GrayImage::from_fn(g.width(), g.height(), |x, y| {
                Luma([scale_to_byte(f64::from(g.get_pixel(x, y).0[0]), max)])
            })
        })
        .collect()
}
