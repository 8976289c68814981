//! Apply a drawn mask back onto the source volume.

use ndarray::{Array3, ArrayView3, Zip};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::types::{Mask, PipelineError};

/// What to do with voxels under the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskPolicy {
    /// Zero the voxels under the mask.
    #[default]
    Erase,
    /// Keep only the voxels under the mask.
    Retain,
}

/// Copy `volume`, zeroing voxels according to `policy`.
///
/// Any non-zero mask voxel counts as masked.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] when the mask and volume
/// shapes differ.
pub fn apply_mask<T>(
    volume: ArrayView3<'_, T>,
    mask: &Mask,
    policy: MaskPolicy,
) -> Result<Array3<T>, PipelineError>
where
    T: Copy + Zero,
{
    if volume.dim() != mask.dim() {
        return Err(PipelineError::ShapeMismatch {
            expected: volume.dim(),
            found: mask.dim(),
        });
    }
    let keep_masked = policy == MaskPolicy::Retain;
    Ok(Zip::from(&volume)
        .and(mask)
        .map_collect(|&v, &m| if (m != 0) == keep_masked { v } else { T::zero() }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array3;

    use super::*;
    use crate::types::MASK_ON;

    fn fixture() -> (Array3<u16>, Mask) {
        let volume = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| {
            u16::try_from(1 + z * 12 + y * 4 + x).unwrap()
        });
        let mut mask = Mask::zeros((2, 3, 4));
        mask[[0, 1, 1]] = MASK_ON;
        mask[[1, 2, 3]] = MASK_ON;
        (volume, mask)
    }

    #[test]
    fn erase_zeroes_masked_voxels() {
        let (volume, mask) = fixture();
        let out = apply_mask(volume.view(), &mask, MaskPolicy::Erase).unwrap();
        assert_eq!(out[[0, 1, 1]], 0);
        assert_eq!(out[[1, 2, 3]], 0);
        assert_eq!(out[[0, 0, 0]], 1);
        assert_eq!(out.iter().filter(|&&v| v == 0).count(), 2);
    }

    #[test]
    fn retain_keeps_only_masked_voxels() {
        let (volume, mask) = fixture();
        let out = apply_mask(volume.view(), &mask, MaskPolicy::Retain).unwrap();
        assert_eq!(out[[0, 1, 1]], volume[[0, 1, 1]]);
        assert_eq!(out[[1, 2, 3]], volume[[1, 2, 3]]);
        assert_eq!(out.iter().filter(|&&v| v != 0).count(), 2);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let (volume, _) = fixture();
        let mask = Mask::zeros((2, 3, 5));
        assert_eq!(
            apply_mask(volume.view(), &mask, MaskPolicy::Erase),
            Err(PipelineError::ShapeMismatch {
                expected: (2, 3, 4),
                found: (2, 3, 5),
            })
        );
    }
}
