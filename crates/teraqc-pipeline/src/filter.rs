//! Geometric filtering of detected segments.
//!
//! A segment is kept only if it passes both criteria:
//!
//! 1. **Radial**: its perpendicular distance `d` from the slice center
//!    clears [`RadialPolicy`], which compares `(d, z)` against an ellipse
//!    fitted to every segment's `(d, z)`.
//! 2. **Orientation**: its direction lies within `angle_lim` degrees of
//!    the dominant orientation, the leading right singular vector of all
//!    direction vectors stacked as rows.
//!
//! Zero-length segments have no direction and no distance; they are
//! dropped before either criterion and counted separately.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::ellipse::{Ellipse, EllipseFitKind, EllipseFitter};
use crate::types::{LineSegment, VolumeShape};

/// Radial acceptance rule.
///
/// A segment passes when
///
/// - `d >= min_dist`, and
/// - if an ellipse was fitted, its normalized ellipse radius `r`
///   satisfies `r >= ellipse_ratio` and, when `max_ellipse_ratio` is set,
///   `r <= max_ellipse_ratio`.
///
/// Segments far from the typical `(d, z)` envelope are the marker
/// candidates. The upper bound is optional: without it, arbitrarily
/// distant outliers are kept.
///
/// The ellipse test is relative to the scatter. A direct fit passes its
/// boundary through the points, so a line through the slice center can
/// score `r >= 1`; only `min_dist > 0` guarantees such lines are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadialPolicy {
    /// Floor on the perpendicular distance from the slice center.
    pub min_dist: f64,
    /// Lower bound on the normalized ellipse radius.
    pub ellipse_ratio: f64,
    /// Optional upper bound on the normalized ellipse radius.
    pub max_ellipse_ratio: Option<f64>,
}

impl RadialPolicy {
    /// Extract the policy from a pipeline configuration.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_dist: config.min_dist,
            ellipse_ratio: config.ellipse_ratio,
            max_ellipse_ratio: config.max_ellipse_ratio,
        }
    }

    /// Apply the rule to a distance and, if an ellipse exists, the
    /// normalized radius of `(d, z)`.
    #[must_use]
    pub fn passes(&self, distance: f64, radius: Option<f64>) -> bool {
        if distance < self.min_dist {
            return false;
        }
        radius.is_none_or(|r| {
            r >= self.ellipse_ratio && self.max_ellipse_ratio.is_none_or(|max| r <= max)
        })
    }
}

/// Why segments were dropped.
///
/// A segment failing both criteria counts once under each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    /// Zero-length segments.
    pub degenerate: usize,
    /// Segments failing [`RadialPolicy::passes`].
    pub radial: usize,
    /// Segments outside the orientation tolerance.
    pub orientation: usize,
}

/// Result of [`filter_lines`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Segments passing both criteria, in input order.
    pub kept: Vec<LineSegment>,
    /// Ellipse fitted to the `(d, z)` scatter, if any.
    pub ellipse: Option<Ellipse>,
    /// Dominant orientation as a unit vector, if any segment was scorable.
    pub dominant_axis: Option<[f64; 3]>,
    /// Rejection tallies.
    pub rejected: RejectionCounts,
}

/// Perpendicular distance from `center` to the infinite line through the
/// segment, in the slice plane.
///
/// Zero-length segments have distance `0`.
#[must_use]
pub fn radial_distance(segment: &LineSegment, center: (f64, f64)) -> f64 {
    let (x1, y1) = (f64::from(segment.start.x), f64::from(segment.start.y));
    let (x2, y2) = (f64::from(segment.end.x), f64::from(segment.end.y));
    let (dx, dy) = (x2 - x1, y2 - y1);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return 0.0;
    }
    let cross = dx.mul_add(y1 - center.1, -(dy * (x1 - center.0)));
    cross.abs() / length
}

/// Leading right singular vector of the segments' direction vectors.
///
/// The sign is fixed so the first non-zero component is positive.
/// Returns `None` for an empty set or if every direction is zero.
#[must_use]
pub fn dominant_orientation(segments: &[LineSegment]) -> Option<[f64; 3]> {
    if segments.is_empty() {
        return None;
    }
    let rows: Vec<f64> = segments.iter().flat_map(LineSegment::direction).collect();
    let directions = DMatrix::from_row_slice(segments.len(), 3, &rows);
    let svd = directions.svd(false, true);
    let v_t = svd.v_t?;

    let (best, &sigma) = svd
        .singular_values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if sigma <= 0.0 {
        return None;
    }

    let row = v_t.row(best);
    let mut axis = [row[0], row[1], row[2]];
    let norm = axis.iter().map(|c| c * c).sum::<f64>().sqrt();
    if norm == 0.0 {
        return None;
    }
    let sign = axis
        .iter()
        .find(|c| c.abs() > 1e-12)
        .map_or(1.0, |c| c.signum());
    for c in &mut axis {
        *c *= sign / norm;
    }
    Some(axis)
}

/// Acute angle in degrees between `v` and the line along `axis`.
///
/// A vector and its reverse give the same angle.
#[must_use]
pub fn acute_angle_deg(v: [f64; 3], axis: [f64; 3]) -> f64 {
    let dot: f64 = v.iter().zip(&axis).map(|(a, b)| a * b).sum();
    let nv = v.iter().map(|c| c * c).sum::<f64>().sqrt();
    let na = axis.iter().map(|c| c * c).sum::<f64>().sqrt();
    if nv == 0.0 || na == 0.0 {
        return 90.0;
    }
    (dot.abs() / (nv * na)).clamp(0.0, 1.0).acos().to_degrees()
}

/// Keep the segments that pass both the radial and the orientation
/// criteria.
#[must_use]
pub fn filter_lines(
    lines: &[LineSegment],
    shape: VolumeShape,
    policy: &RadialPolicy,
    fit: EllipseFitKind,
    angle_lim: f64,
) -> FilterOutcome {
    let (scorable, degenerate): (Vec<LineSegment>, Vec<LineSegment>) =
        lines.iter().copied().partition(|s| !s.is_degenerate());
    let mut rejected = RejectionCounts {
        degenerate: degenerate.len(),
        ..RejectionCounts::default()
    };
    if !degenerate.is_empty() {
        log::debug!("skipping {} zero-length segments", degenerate.len());
    }

    let center = shape.center_xy();
    let points: Vec<[f64; 2]> = scorable
        .iter()
        .map(|s| [radial_distance(s, center), f64::from(s.z())])
        .collect();

    let ellipse = fit.fit(&points);
    match &ellipse {
        Some(e) => log::debug!("distance/depth ellipse: {e:?}"),
        None if !scorable.is_empty() => log::info!(
            "no ellipse fits {} distance/depth points; applying only the distance floor",
            points.len()
        ),
        None => {}
    }

    let dominant_axis = dominant_orientation(&scorable);

    let mut kept = Vec::new();
    for (segment, point) in scorable.iter().zip(&points) {
        let radius = ellipse.map(|e| e.normalized_radius(*point));
        let radial_ok = policy.passes(point[0], radius);
        let orientation_ok =
            dominant_axis.is_none_or(|axis| acute_angle_deg(segment.direction(), axis) <= angle_lim);
        if !radial_ok {
            rejected.radial += 1;
        }
        if !orientation_ok {
            rejected.orientation += 1;
        }
        if radial_ok && orientation_ok {
            kept.push(*segment);
        }
    }

    log::info!(
        "kept {} of {} segments ({} radial, {} orientation, {} degenerate rejections)",
        kept.len(),
        lines.len(),
        rejected.radial,
        rejected.orientation,
        rejected.degenerate,
    );

    FilterOutcome {
        kept,
        ellipse,
        dominant_axis,
        rejected,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn open_policy() -> RadialPolicy {
        RadialPolicy {
            min_dist: 0.0,
            ellipse_ratio: 0.0,
            max_ellipse_ratio: None,
        }
    }

    #[test]
    fn radial_distance_of_horizontal_segment() {
        let seg = LineSegment::on_slice(0, 10, 100, 10, 0);
        assert!((radial_distance(&seg, (50.0, 50.0)) - 40.0).abs() < 1e-12);
    }

    #[test]
    fn radial_distance_is_symmetric_in_endpoints() {
        let a = LineSegment::on_slice(3, 7, 40, 90, 2);
        let b = LineSegment::on_slice(40, 90, 3, 7, 2);
        let c = (25.0, 31.5);
        assert!((radial_distance(&a, c) - radial_distance(&b, c)).abs() < 1e-12);
    }

    #[test]
    fn line_through_center_has_zero_distance() {
        let seg = LineSegment::on_slice(0, 0, 100, 100, 0);
        assert!(radial_distance(&seg, (50.0, 50.0)).abs() < 1e-12);
    }

    #[test]
    fn policy_floor_applies_without_ellipse() {
        let policy = RadialPolicy {
            min_dist: 10.0,
            ..open_policy()
        };
        assert!(!policy.passes(9.9, None));
        assert!(policy.passes(10.0, None));
    }

    #[test]
    fn policy_ratio_bounds() {
        let policy = RadialPolicy {
            min_dist: 0.0,
            ellipse_ratio: 1.0,
            max_ellipse_ratio: Some(3.0),
        };
        assert!(!policy.passes(5.0, Some(0.5)));
        assert!(policy.passes(5.0, Some(1.0)));
        assert!(policy.passes(5.0, Some(3.0)));
        assert!(!policy.passes(5.0, Some(3.5)));
    }

    #[test]
    fn policy_without_upper_bound_keeps_far_outliers() {
        // Without `max_ellipse_ratio` the rule is one-sided; any radius
        // beyond the threshold passes.
        let policy = RadialPolicy {
            ellipse_ratio: 1.0,
            ..open_policy()
        };
        assert!(policy.passes(5.0, Some(1e9)));
    }

    #[test]
    fn acute_angle_ignores_direction_sign() {
        let axis = [1.0, 0.0, 0.0];
        assert!(acute_angle_deg([5.0, 0.0, 0.0], axis).abs() < 1e-9);
        assert!(acute_angle_deg([-5.0, 0.0, 0.0], axis).abs() < 1e-9);
        assert!((acute_angle_deg([1.0, 1.0, 0.0], axis) - 45.0).abs() < 1e-9);
        assert!((acute_angle_deg([0.0, -3.0, 0.0], axis) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn dominant_orientation_of_horizontal_set() {
        let segments: Vec<LineSegment> = (0..5)
            .map(|i| LineSegment::on_slice(0, i * 10, 80 + i, i * 10, i))
            .chain([LineSegment::on_slice(0, 0, 10, 10, 0)])
            .collect();
        let axis = dominant_orientation(&segments).unwrap();
        assert!(axis[0] > 0.99);
        assert!(axis[2].abs() < 1e-12);
    }

    #[test]
    fn dominant_orientation_of_empty_set() {
        assert_eq!(dominant_orientation(&[]), None);
    }

    #[test]
    fn off_angle_segment_rejected() {
        let shape = VolumeShape::from_dim((10, 200, 200));
        let mut lines: Vec<LineSegment> = (0..8)
            .map(|i| LineSegment::on_slice(20, 10 + i * 3, 180, 10 + i * 3, i))
            .collect();
        let diagonal = LineSegment::on_slice(20, 20, 120, 120, 8);
        lines.push(diagonal);

        let outcome = filter_lines(&lines, shape, &open_policy(), EllipseFitKind::Direct, 5.0);
        assert_eq!(outcome.kept.len(), 8);
        assert!(!outcome.kept.contains(&diagonal));
        assert_eq!(outcome.rejected.orientation, 1);
    }

    #[test]
    fn center_segment_rejected_by_distance_floor() {
        let shape = VolumeShape::from_dim((4, 100, 100));
        let through_center = LineSegment::on_slice(10, 50, 90, 50, 1);
        let far = LineSegment::on_slice(10, 5, 90, 5, 2);
        let policy = RadialPolicy {
            min_dist: 10.0,
            ..open_policy()
        };
        let outcome = filter_lines(
            &[through_center, far],
            shape,
            &policy,
            EllipseFitKind::Direct,
            5.0,
        );
        assert_eq!(outcome.kept, vec![far]);
        assert_eq!(outcome.rejected.radial, 1);
        assert!(outcome.ellipse.is_none());
    }

    #[test]
    fn ellipse_ratio_keeps_outliers_of_envelope() {
        let shape = VolumeShape::from_dim((20, 400, 400));
        // A cloud of near-center streaks and one far streak on the same axis.
        let mut lines: Vec<LineSegment> = (0..12)
            .map(|i| {
                let y = 200 - 10 + (i % 4) * 5;
                LineSegment::on_slice(50, y, 350, y, 2 + (i % 5))
            })
            .collect();
        let far = LineSegment::on_slice(50, 20, 350, 20, 4);
        lines.push(far);

        let policy = RadialPolicy {
            ellipse_ratio: 1.0,
            ..open_policy()
        };
        let outcome = filter_lines(&lines, shape, &policy, EllipseFitKind::Moments, 5.0);
        assert!(outcome.ellipse.is_some());
        assert!(outcome.kept.contains(&far));
        assert!(outcome.kept.len() < lines.len());
    }

    #[test]
    fn degenerate_segments_are_counted_not_scored() {
        let shape = VolumeShape::from_dim((2, 50, 50));
        let point = LineSegment::on_slice(7, 7, 7, 7, 0);
        let line = LineSegment::on_slice(0, 3, 40, 3, 1);
        let outcome = filter_lines(&[point, line], shape, &open_policy(), EllipseFitKind::Direct, 5.0);
        assert_eq!(outcome.rejected.degenerate, 1);
        assert_eq!(outcome.kept, vec![line]);
    }

    #[test]
    fn empty_input_gives_empty_outcome() {
        let shape = VolumeShape::from_dim((1, 10, 10));
        let outcome = filter_lines(&[], shape, &open_policy(), EllipseFitKind::Direct, 5.0);
        assert_eq!(outcome, FilterOutcome::default());
    }
}
