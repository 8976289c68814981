//! Shared types for the teraqc marker removal pipeline.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::filter::FilterOutcome;

/// Re-export `GrayImage` so downstream crates can reference
/// per-slice intermediates without depending on `image` directly.
pub use image::GrayImage;

/// Value written to mask voxels that belong to a marker.
pub const MASK_ON: u8 = 255;

/// Binary marker mask, indexed `(z, y, x)` like the input volume.
///
/// Every voxel is either `0` or [`MASK_ON`].
pub type Mask = Array3<u8>;

/// An integer voxel position in volume coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    /// Column (pixels from the left edge of a slice).
    pub x: i32,
    /// Row (pixels from the top edge of a slice).
    pub y: i32,
    /// Slice index.
    pub z: i32,
}

impl Voxel {
    /// Create a new voxel position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A straight candidate marker streak detected within one slice.
///
/// Both endpoints share the same `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSegment {
    /// First endpoint.
    pub start: Voxel,
    /// Second endpoint.
    pub end: Voxel,
}

impl LineSegment {
    /// Create a segment from two endpoints.
    #[must_use]
    pub const fn new(start: Voxel, end: Voxel) -> Self {
        Self { start, end }
    }

    /// Lift a 2D segment `(x1, y1)-(x2, y2)` onto slice `z`.
    #[must_use]
    pub const fn on_slice(x1: i32, y1: i32, x2: i32, y2: i32, z: i32) -> Self {
        Self {
            start: Voxel::new(x1, y1, z),
            end: Voxel::new(x2, y2, z),
        }
    }

    /// Slice index the segment was detected on.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.start.z
    }

    /// Direction vector `start - end` as `[x, y, z]`.
    #[must_use]
    pub fn direction(&self) -> [f64; 3] {
        [
            f64::from(self.start.x - self.end.x),
            f64::from(self.start.y - self.end.y),
            f64::from(self.start.z - self.end.z),
        ]
    }

    /// Euclidean length of the segment.
    #[must_use]
    pub fn length(&self) -> f64 {
        let [dx, dy, dz] = self.direction();
        dx.mul_add(dx, dy.mul_add(dy, dz * dz)).sqrt()
    }

    /// A segment whose endpoints coincide cannot be scored by the filter.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

/// Extents of a volume along `(z, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeShape {
    /// Number of slices.
    pub depth: usize,
    /// Rows per slice.
    pub height: usize,
    /// Columns per slice.
    pub width: usize,
}

impl VolumeShape {
    /// Create a shape from `(z, y, x)` extents, the order `ndarray` uses.
    #[must_use]
    pub const fn from_dim((depth, height, width): (usize, usize, usize)) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    /// The `(z, y, x)` tuple accepted by `ndarray` constructors.
    #[must_use]
    pub const fn dim(self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }

    /// Total number of voxels.
    #[must_use]
    pub const fn voxel_count(self) -> usize {
        self.depth * self.height * self.width
    }

    /// Returns `true` if any extent is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.depth == 0 || self.height == 0 || self.width == 0
    }

    /// Center of a slice as `(x, y)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center_xy(self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Whether a voxel lies inside the volume.
    #[must_use]
    pub fn contains(self, voxel: Voxel) -> bool {
        let inside = |v: i32, extent: usize| usize::try_from(v).is_ok_and(|v| v < extent);
        inside(voxel.x, self.width) && inside(voxel.y, self.height) && inside(voxel.z, self.depth)
    }
}

/// Result of running the pipeline with every intermediate preserved.
///
/// Slice stacks hold one [`GrayImage`] per z-layer. Useful for tuning
/// parameters against a real volume; callers that only need the mask
/// should prefer [`crate::remove_markers`].
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Extents of the input volume.
    pub shape: VolumeShape,
    /// Input scaled to 8 bits by its global maximum.
    pub normalized: Vec<GrayImage>,
    /// Gradient magnitude quantized to 8 bits by its global maximum.
    pub edges: Vec<GrayImage>,
    /// Otsu-thresholded edge response (0 or 255).
    pub binary: Vec<GrayImage>,
    /// Global Otsu level, `None` when the edge response was constant.
    pub threshold: Option<u8>,
    /// Every segment found by the line detector, in slice order.
    pub lines: Vec<LineSegment>,
    /// Geometric filter decision over `lines`.
    pub filter: FilterOutcome,
    /// Final marker mask.
    pub mask: Mask,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The input volume has a zero-length axis.
    #[error("input volume is empty")]
    EmptyVolume,

    /// A slice is too large to be represented as an image, or there are
    /// more slices than a segment can index.
    #[error("volume of {depth}x{height}x{width} exceeds the supported extents")]
    VolumeTooLarge {
        /// Number of slices.
        depth: usize,
        /// Slice width in pixels.
        width: usize,
        /// Slice height in pixels.
        height: usize,
    },

    /// Two volumes that must share extents do not.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Shape of the reference volume.
        expected: (usize, usize, usize),
        /// Shape actually provided.
        found: (usize, usize, usize),
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn segment_on_slice_shares_z() {
        let seg = LineSegment::on_slice(1, 2, 3, 4, 7);
        assert_eq!(seg.start.z, 7);
        assert_eq!(seg.end.z, 7);
        assert_eq!(seg.z(), 7);
    }

    #[test]
    fn segment_direction_and_length() {
        let seg = LineSegment::on_slice(3, 4, 0, 0, 0);
        assert_eq!(seg.direction(), [3.0, 4.0, 0.0]);
        assert!((seg.length() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_length_segment_is_degenerate() {
        assert!(LineSegment::on_slice(5, 5, 5, 5, 1).is_degenerate());
        assert!(!LineSegment::on_slice(5, 5, 6, 5, 1).is_degenerate());
    }

    #[test]
    fn shape_center_uses_half_extents() {
        let shape = VolumeShape::from_dim((3, 40, 101));
        assert_eq!(shape.center_xy(), (50.5, 20.0));
        assert_eq!(shape.voxel_count(), 3 * 40 * 101);
    }

    #[test]
    fn shape_contains_checks_every_axis() {
        let shape = VolumeShape::from_dim((2, 10, 20));
        assert!(shape.contains(Voxel::new(19, 9, 1)));
        assert!(!shape.contains(Voxel::new(20, 9, 1)));
        assert!(!shape.contains(Voxel::new(0, 10, 0)));
        assert!(!shape.contains(Voxel::new(0, 0, 2)));
        assert!(!shape.contains(Voxel::new(-1, 0, 0)));
    }

    #[test]
    fn empty_shape_detected() {
        assert!(VolumeShape::from_dim((0, 5, 5)).is_empty());
        assert!(!VolumeShape::from_dim((1, 1, 1)).is_empty());
    }

    #[test]
    fn error_invalid_config_display() {
        let err = PipelineError::InvalidConfig("rho must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "invalid pipeline configuration: rho must be positive",
        );
    }

    #[test]
    fn segment_serde_round_trip() {
        let seg = LineSegment::on_slice(0, 1, 20, 21, 3);
        let json = serde_json::to_string(&seg).unwrap();
        let back: LineSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(seg, back);
    }
}
