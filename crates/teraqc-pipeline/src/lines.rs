//! Line detection across a binary slice stack.

use image::GrayImage;

use crate::hough::{self, HoughParams};
use crate::morphology::{self, StructuringElement};
use crate::types::LineSegment;
use crate::volume::map_slices;

/// Close each binary slice with an elliptical element of
/// `closing_size`, then run the line detector on it.
///
/// Returns every segment in slice order. Slices without detections
/// contribute nothing.
#[must_use]
pub fn detect_lines(
    binary: &[GrayImage],
    closing_size: u32,
    params: &HoughParams,
) -> Vec<LineSegment> {
    let element = StructuringElement::Ellipse { size: closing_size };
    let per_slice = map_slices(binary, |z, slice| {
        let closed = morphology::close(slice, element);
        // `slice_extent` rejects stacks deeper than i32::MAX at normalization.
        let z = i32::try_from(z).unwrap_or(i32::MAX);
        hough::probabilistic_hough(&closed, params, z)
    });

    let lines: Vec<LineSegment> = per_slice.into_iter().flatten().collect();
    log::debug!(
        "detected {} segments across {} slices",
        lines.len(),
        binary.len()
    );
    lines
}
