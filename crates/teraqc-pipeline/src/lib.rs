//! teraqc-pipeline: marker removal for stitched microscopy volumes (sans-IO).
//!
//! Finds the straight streaks left by linear fiducial markers and returns
//! a binary mask covering them:
//! normalize -> close + Sobel -> pooled Otsu -> close + Hough per slice ->
//! radial and orientation filter -> draw + final 1D closing.
//!
//! The crate works on in-memory `ndarray` volumes only. Reading tile
//! hierarchies and writing TIFF stacks lives in `teraqc-io`.

pub mod config;
pub mod diagnostics;
pub mod draw;
pub mod ellipse;
pub mod filter;
pub mod gradient;
pub mod hough;
pub mod lines;
pub mod mask;
pub mod morphology;
pub mod pipeline;
pub mod threshold;
pub mod types;
pub mod volume;

use ndarray::ArrayView3;
use num_traits::ToPrimitive;

pub use config::PipelineConfig;
pub use draw::MaskClosingAxis;
pub use ellipse::{Ellipse, EllipseFitKind, EllipseFitter};
pub use filter::{FilterOutcome, RadialPolicy, RejectionCounts};
pub use mask::{MaskPolicy, apply_mask};
pub use pipeline::{Pipeline, PipelineStage};
pub use types::{
    LineSegment, MASK_ON, Mask, PipelineError, StagedResult, Voxel, VolumeShape,
};

/// Compute the marker mask of `volume`.
///
/// The mask has the shape of `volume`; voxels on a detected marker are
/// [`MASK_ON`], everything else is zero. Intermediate stacks are freed as
/// soon as the next stage no longer needs them.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// validation, and [`PipelineError::EmptyVolume`] or
/// [`PipelineError::VolumeTooLarge`] for unusable extents.
pub fn remove_markers<T>(
    volume: ArrayView3<'_, T>,
    config: &PipelineConfig,
) -> Result<Mask, PipelineError>
where
    T: ToPrimitive + Copy,
{
    Pipeline::new(volume, config.clone())?.into_mask()
}

/// Run the full pipeline and keep every intermediate.
///
/// # Errors
///
/// Same conditions as [`remove_markers`].
pub fn process_staged<T>(
    volume: ArrayView3<'_, T>,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError>
where
    T: ToPrimitive + Copy,
{
    Pipeline::new(volume, config.clone())?.complete()
}
