//! Rasterize kept segments into a mask and close the gaps between them.

use image::{GrayImage, Luma};
use imageproc::drawing::{BresenhamLineIter, draw_filled_circle_mut, draw_line_segment_mut};
use serde::{Deserialize, Serialize};

use crate::morphology::{self, StructuringElement};
use crate::types::{LineSegment, MASK_ON, Mask, PipelineError, VolumeShape};
use crate::volume::{map_slices, slice_extent, stack_to_array};

/// Axis of the final mask closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskClosingAxis {
    /// Along each row of a slice.
    #[default]
    Row,
    /// Along z for each `(y, x)` column, joining streaks across slices.
    Depth,
}

/// Endpoints of `segment` moved outward by `ratio` of its length at each
/// end.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn extend(segment: &LineSegment, ratio: f64) -> ((f32, f32), (f32, f32)) {
    let (x1, y1) = (f64::from(segment.start.x), f64::from(segment.start.y));
    let (x2, y2) = (f64::from(segment.end.x), f64::from(segment.end.y));
    let (dx, dy) = ((x2 - x1) * ratio, (y2 - y1) * ratio);
    let to_f32 = |v: f64| v as f32;
    (
        (to_f32(x1 - dx), to_f32(y1 - dy)),
        (to_f32(x2 + dx), to_f32(y2 + dy)),
    )
}

/// Draw one segment with the given width.
///
/// Width 1 is a Bresenham line; wider lines stamp filled discs of radius
/// `width / 2` along the Bresenham path.
pub fn draw_segment(canvas: &mut GrayImage, start: (f32, f32), end: (f32, f32), width: u32) {
    let color = Luma([MASK_ON]);
    if width <= 1 {
        draw_line_segment_mut(canvas, start, end, color);
        return;
    }
    let radius = i32::try_from(width / 2).unwrap_or(i32::MAX);
    for center in BresenhamLineIter::new(start, end) {
        draw_filled_circle_mut(canvas, center, radius, color);
    }
}

/// Draw every segment on its slice of a zeroed stack.
///
/// # Errors
///
/// Returns the errors of [`slice_extent`] for an empty or oversized
/// shape.
pub fn draw_segments(
    shape: VolumeShape,
    segments: &[LineSegment],
    width: u32,
    extend_ratio: f64,
) -> Result<Vec<GrayImage>, PipelineError> {
    let (w, h) = slice_extent(shape)?;
    let mut slices = vec![GrayImage::new(w, h); shape.depth];
    for segment in segments {
        let Some(slice) = usize::try_from(segment.z())
            .ok()
            .and_then(|z| slices.get_mut(z))
        else {
            log::debug!("segment {segment:?} lies outside the volume; skipped");
            continue;
        };
        let (start, end) = extend(segment, extend_ratio);
        draw_segment(slice, start, end, width);
    }
    Ok(slices)
}

/// Rasterize segments and apply the final 1D closing.
///
/// # Errors
///
/// Same conditions as [`draw_segments`].
pub fn draw_mask(
    shape: VolumeShape,
    segments: &[LineSegment],
    width: u32,
    extend_ratio: f64,
    closing_length: u32,
    axis: MaskClosingAxis,
) -> Result<Mask, PipelineError> {
    let slices = draw_segments(shape, segments, width, extend_ratio)?;
    match axis {
        MaskClosingAxis::Row => {
            let element = StructuringElement::Rect {
                width: closing_length,
                height: 1,
            };
            let closed = map_slices(&slices, |_, slice| morphology::close(slice, element));
            stack_to_array(&closed, shape)
        }
        MaskClosingAxis::Depth => {
            let mask = stack_to_array(&slices, shape)?;
            Ok(morphology::close_depth(&mask, closing_length))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn on(mask: &Mask) -> usize {
        mask.iter().filter(|&&v| v == MASK_ON).count()
    }

    #[test]
    fn empty_segment_list_gives_zero_mask() {
        let shape = VolumeShape::from_dim((3, 20, 30));
        let mask = draw_mask(shape, &[], 3, 0.0, 11, MaskClosingAxis::Row).unwrap();
        assert_eq!(mask.dim(), (3, 20, 30));
        assert_eq!(on(&mask), 0);
    }

    #[test]
    fn width_one_draws_single_pixel_line_on_its_slice() {
        let shape = VolumeShape::from_dim((2, 10, 20));
        let seg = LineSegment::on_slice(2, 4, 12, 4, 1);
        let mask = draw_mask(shape, &[seg], 1, 0.0, 1, MaskClosingAxis::Row).unwrap();
        assert_eq!(on(&mask), 11);
        assert_eq!(mask[[1, 4, 2]], MASK_ON);
        assert_eq!(mask[[1, 4, 12]], MASK_ON);
        assert_eq!(mask[[0, 4, 5]], 0);
    }

    #[test]
    fn width_three_covers_three_rows() {
        let shape = VolumeShape::from_dim((1, 20, 40));
        let seg = LineSegment::on_slice(5, 10, 30, 10, 0);
        let mask = draw_mask(shape, &[seg], 3, 0.0, 1, MaskClosingAxis::Row).unwrap();
        for y in 9..=11 {
            assert_eq!(mask[[0, y, 15]], MASK_ON);
        }
        assert_eq!(mask[[0, 8, 15]], 0);
        assert_eq!(mask[[0, 12, 15]], 0);
    }

    #[test]
    fn extend_lengthens_both_ends() {
        let seg = LineSegment::on_slice(10, 0, 20, 0, 0);
        let (start, end) = extend(&seg, 0.5);
        assert!((start.0 - 5.0).abs() < f32::EPSILON);
        assert!((end.0 - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn row_closing_joins_dashes() {
        let shape = VolumeShape::from_dim((1, 5, 40));
        let segments = [
            LineSegment::on_slice(2, 2, 10, 2, 0),
            LineSegment::on_slice(14, 2, 22, 2, 0),
        ];
        let mask = draw_mask(shape, &segments, 1, 0.0, 5, MaskClosingAxis::Row).unwrap();
        for x in 11..14 {
            assert_eq!(mask[[0, 2, x]], MASK_ON);
        }
        assert_eq!(mask[[0, 1, 12]], 0);
    }

    #[test]
    fn depth_closing_joins_slices() {
        let shape = VolumeShape::from_dim((7, 8, 8));
        let segments = [
            LineSegment::on_slice(1, 3, 6, 3, 2),
            LineSegment::on_slice(1, 3, 6, 3, 4),
        ];
        let mask = draw_mask(shape, &segments, 1, 0.0, 3, MaskClosingAxis::Depth).unwrap();
        assert_eq!(mask[[3, 3, 4]], MASK_ON);
        assert_eq!(mask[[3, 4, 4]], 0);
    }

    #[test]
    fn out_of_range_slice_is_skipped() {
        let shape = VolumeShape::from_dim((1, 8, 8));
        let seg = LineSegment::on_slice(0, 0, 7, 0, 5);
        let mask = draw_mask(shape, &[seg], 1, 0.0, 1, MaskClosingAxis::Row).unwrap();
        assert_eq!(on(&mask), 0);
    }

    #[test]
    fn axis_serde_names() {
        assert_eq!(serde_json::to_string(&MaskClosingAxis::Depth).unwrap(), "\"depth\"");
        assert_eq!(MaskClosingAxis::default(), MaskClosingAxis::Row);
    }
}
