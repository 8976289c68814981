//! Conversions between `ndarray` volumes and per-slice `GrayImage` stacks.

use image::GrayImage;
use ndarray::{Array3, ArrayView3};
use num_traits::ToPrimitive;

use crate::types::{PipelineError, VolumeShape};

/// Scale a volume of any numeric sample type to an 8-bit slice stack.
///
/// Each sample becomes `v / max * 255` truncated, where `max` is the
/// largest sample in the whole volume. Negative or non-representable
/// samples map to zero. An all-zero volume yields all-zero slices.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyVolume`] if any axis has length zero and
/// [`PipelineError::VolumeTooLarge`] if a slice does not fit a
/// [`GrayImage`] or the depth exceeds `i32::MAX`.
pub fn normalize_volume<T>(volume: ArrayView3<'_, T>) -> Result<Vec<GrayImage>, PipelineError>
where
    T: ToPrimitive + Copy,
{
    let shape = VolumeShape::from_dim(volume.dim());
    let (width, height) = slice_extent(shape)?;

    let max = volume
        .iter()
        .filter_map(|v| v.to_f64())
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    log::debug!("normalizing {shape:?} by global maximum {max}");

    let slices = volume
        .outer_iter()
        .map(|slice| {
            GrayImage::from_fn(width, height, |x, y| {
                let v = slice[[y as usize, x as usize]].to_f64().unwrap_or(0.0);
                image::Luma([scale_to_byte(v, max)])
            })
        })
        .collect();
    Ok(slices)
}

/// Map `value` in `0..=max` to `0..=255`, truncating.
///
/// A non-positive `max` maps everything to zero.
#[must_use]
pub fn scale_to_byte(value: f64, max: f64) -> u8 {
    if max > 0.0 {
        quantize(value / max * 255.0)
    } else {
        0
    }
}

/// Convert a real value already scaled to `0..=255` into a byte.
///
/// Truncates toward zero and saturates; NaN maps to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize(value: f64) -> u8 {
    // `as` saturates and maps NaN to 0.
    value as u8
}

/// Validate a shape and return its slice extent as `(width, height)`.
///
/// # Errors
///
/// Same conditions as [`normalize_volume`].
pub fn slice_extent(shape: VolumeShape) -> Result<(u32, u32), PipelineError> {
    if shape.is_empty() {
        return Err(PipelineError::EmptyVolume);
    }
    let too_large = || PipelineError::VolumeTooLarge {
        depth: shape.depth,
        width: shape.width,
        height: shape.height,
    };
    i32::try_from(shape.depth).map_err(|_| too_large())?;
    let width = u32::try_from(shape.width).map_err(|_| too_large())?;
    let height = u32::try_from(shape.height).map_err(|_| too_large())?;
    Ok((width, height))
}

/// Reassemble a slice stack into a `(z, y, x)` volume.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the slices do not all
/// match `shape`.
pub fn stack_to_array(
    slices: &[GrayImage],
    shape: VolumeShape,
) -> Result<Array3<u8>, PipelineError> {
    let mismatch = |found| PipelineError::ShapeMismatch {
        expected: shape.dim(),
        found,
    };
    if slices.len() != shape.depth {
        return Err(mismatch((slices.len(), shape.height, shape.width)));
    }
    if let Some(odd) = slices
        .iter()
        .find(|s| s.width() as usize != shape.width || s.height() as usize != shape.height)
    {
        return Err(mismatch((
            slices.len(),
            odd.height() as usize,
            odd.width() as usize,
        )));
    }

    let mut data = Vec::with_capacity(shape.voxel_count());
    for slice in slices {
        data.extend_from_slice(slice.as_raw());
    }
    Array3::from_shape_vec(shape.dim(), data).map_err(|_| mismatch(shape.dim()))
}

/// Apply `f` to every slice, returning results in slice order.
///
/// Runs on the rayon thread pool when the `rayon` feature is enabled.
pub fn map_slices<F, R>(slices: &[GrayImage], f: F) -> Vec<R>
where
    F: Fn(usize, &GrayImage) -> R + Sync + Send,
    R: Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        slices
            .par_iter()
            .enumerate()
            .map(|(z, slice)| f(z, slice))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        slices
            .iter()
            .enumerate()
            .map(|(z, slice)| f(z, slice))
            .collect()
    }
}
