//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use ndarray::Array3;
//! # use teraqc_pipeline::{Pipeline, PipelineConfig, PipelineError};
//! # fn run(volume: Array3<u16>) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(volume.view(), PipelineConfig::default())?
//!     .enhance_edges()
//!     .threshold()
//!     .detect_lines()
//!     .filter_lines()
//!     .draw_mask()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! every earlier intermediate along. Skipping a stage or calling them out
//! of order does not compile.
//!
//! # Memory
//!
//! Every stage from [`EdgesEnhanced`] onward keeps the normalized, edge
//! and binary stacks (one byte per voxel each) until
//! [`MaskDrawn::into_result`] hands them to [`StagedResult`]. Callers
//! that only need the mask should use [`Normalized::into_mask`] (or
//! [`crate::remove_markers`]), which frees each stack once the next one
//! is built.

use ndarray::ArrayView3;
use num_traits::ToPrimitive;

use crate::config::PipelineConfig;
use crate::diagnostics::StageMetrics;
use crate::filter::{self, FilterOutcome, RadialPolicy};
use crate::hough::HoughParams;
use crate::types::{GrayImage, LineSegment, MASK_ON, Mask, PipelineError, StagedResult, VolumeShape};
use crate::{draw, gradient, lines, threshold, volume};

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 6;

// ───────────────────────── Stage 0: Normalized ────────────────────────

/// Pipeline state after scaling the volume to 8 bits.
#[must_use = "pipeline stages are consumed by advancing; call .enhance_edges() to continue"]
pub struct Normalized {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
}

impl Normalized {
    /// Extents of the input volume.
    #[must_use]
    pub const fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// The 8-bit slice stack.
    #[must_use]
    pub fn normalized(&self) -> &[GrayImage] {
        &self.normalized
    }

    /// Close and differentiate every slice, then rescale the gradient
    /// magnitude by its global maximum.
    pub fn enhance_edges(self) -> EdgesEnhanced {
        let (edges, gradient_max) = edge_stack(&self.config, &self.normalized);
        EdgesEnhanced {
            config: self.config,
            shape: self.shape,
            normalized: self.normalized,
            edges,
            gradient_max,
        }
    }

    /// Run the remaining stages and return only the mask.
    ///
    /// Each stack is dropped as soon as the next one exists, so at most
    /// two byte stacks (plus the transient `f32` gradient of the edge
    /// stage) are alive at once.
    ///
    /// # Errors
    ///
    /// Same conditions as [`LinesFiltered::draw_mask`].
    pub fn into_mask(self) -> Result<Mask, PipelineError> {
        let Self {
            config,
            shape,
            normalized,
        } = self;
        let (edges, _) = edge_stack(&config, &normalized);
        drop(normalized);
        let (_, binary) = threshold::threshold_stack(&edges);
        drop(edges);
        let params = HoughParams::from_config(&config);
        let lines = lines::detect_lines(&binary, config.line_closing_size, &params);
        drop(binary);
        let outcome = filter::filter_lines(
            &lines,
            shape,
            &RadialPolicy::from_config(&config),
            config.ellipse_fit,
            config.angle_lim,
        );
        draw_kept(&config, shape, &outcome.kept)
    }
}

/// Quantized edge stack and the gradient maximum it was scaled by.
fn edge_stack(config: &PipelineConfig, normalized: &[GrayImage]) -> (Vec<GrayImage>, f32) {
    let closing = config.edge_closing_size;
    let ksize = config.sobel_ksize;
    let gradients = volume::map_slices(normalized, |_, slice| {
        gradient::enhance_edges(slice, closing, ksize)
    });
    let gradient_max = gradient::global_max(&gradients);
    log::debug!("edge response maximum {gradient_max}");
    (gradient::quantize_stack(&gradients), gradient_max)
}

fn draw_kept(
    config: &PipelineConfig,
    shape: VolumeShape,
    kept: &[LineSegment],
) -> Result<Mask, PipelineError> {
    draw::draw_mask(
        shape,
        kept,
        config.line_width,
        config.extend_ratio,
        config.mask_closing_length,
        config.mask_closing_axis,
    )
}

// ───────────────────────── Stage 1: EdgesEnhanced ─────────────────────

/// Pipeline state after edge enhancement.
#[must_use = "pipeline stages are consumed by advancing; call .threshold() to continue"]
pub struct EdgesEnhanced {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
    edges: Vec<GrayImage>,
    gradient_max: f32,
}

impl EdgesEnhanced {
    /// The quantized edge stack.
    #[must_use]
    pub fn edges(&self) -> &[GrayImage] {
        &self.edges
    }

    /// Largest gradient magnitude before quantization.
    #[must_use]
    pub const fn gradient_max(&self) -> f32 {
        self.gradient_max
    }

    /// Binarize the edge stack with one Otsu level pooled over all slices.
    pub fn threshold(self) -> Thresholded {
        let (level, binary) = threshold::threshold_stack(&self.edges);
        Thresholded {
            config: self.config,
            shape: self.shape,
            normalized: self.normalized,
            edges: self.edges,
            binary,
            level,
        }
    }
}

// ───────────────────────── Stage 2: Thresholded ───────────────────────

/// Pipeline state after global thresholding.
#[must_use = "pipeline stages are consumed by advancing; call .detect_lines() to continue"]
pub struct Thresholded {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
    edges: Vec<GrayImage>,
    binary: Vec<GrayImage>,
    level: Option<u8>,
}

impl Thresholded {
    /// The binary stack.
    #[must_use]
    pub fn binary(&self) -> &[GrayImage] {
        &self.binary
    }

    /// The pooled Otsu level, `None` for a constant edge response.
    #[must_use]
    pub const fn level(&self) -> Option<u8> {
        self.level
    }

    /// Find line segments slice by slice.
    pub fn detect_lines(self) -> LinesDetected {
        let params = HoughParams::from_config(&self.config);
        let lines = lines::detect_lines(&self.binary, self.config.line_closing_size, &params);
        LinesDetected {
            config: self.config,
            shape: self.shape,
            normalized: self.normalized,
            edges: self.edges,
            binary: self.binary,
            level: self.level,
            lines,
        }
    }
}

// ───────────────────────── Stage 3: LinesDetected ─────────────────────

/// Pipeline state after line detection.
#[must_use = "pipeline stages are consumed by advancing; call .filter_lines() to continue"]
pub struct LinesDetected {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
    edges: Vec<GrayImage>,
    binary: Vec<GrayImage>,
    level: Option<u8>,
    lines: Vec<LineSegment>,
}

impl LinesDetected {
    /// Every detected segment, in slice order.
    #[must_use]
    pub fn lines(&self) -> &[LineSegment] {
        &self.lines
    }

    /// Apply the radial and orientation filters to the whole segment set.
    pub fn filter_lines(self) -> LinesFiltered {
        let policy = RadialPolicy::from_config(&self.config);
        let outcome = filter::filter_lines(
            &self.lines,
            self.shape,
            &policy,
            self.config.ellipse_fit,
            self.config.angle_lim,
        );
        LinesFiltered {
            config: self.config,
            shape: self.shape,
            normalized: self.normalized,
            edges: self.edges,
            binary: self.binary,
            level: self.level,
            lines: self.lines,
            outcome,
        }
    }
}

// ───────────────────────── Stage 4: LinesFiltered ─────────────────────

/// Pipeline state after filtering.
#[must_use = "pipeline stages are consumed by advancing; call .draw_mask() to continue"]
pub struct LinesFiltered {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
    edges: Vec<GrayImage>,
    binary: Vec<GrayImage>,
    level: Option<u8>,
    lines: Vec<LineSegment>,
    outcome: FilterOutcome,
}

impl LinesFiltered {
    /// The filter decision.
    #[must_use]
    pub const fn outcome(&self) -> &FilterOutcome {
        &self.outcome
    }

    /// Rasterize the kept segments and close the mask.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::VolumeTooLarge`] if a slice cannot be
    /// allocated as an image.
    pub fn draw_mask(self) -> Result<MaskDrawn, PipelineError> {
        let mask = draw_kept(&self.config, self.shape, &self.outcome.kept)?;
        Ok(MaskDrawn {
            config: self.config,
            shape: self.shape,
            normalized: self.normalized,
            edges: self.edges,
            binary: self.binary,
            level: self.level,
            lines: self.lines,
            outcome: self.outcome,
            mask,
        })
    }
}

// ───────────────────────── Stage 5: MaskDrawn ─────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to obtain the staged result"]
pub struct MaskDrawn {
    config: PipelineConfig,
    shape: VolumeShape,
    normalized: Vec<GrayImage>,
    edges: Vec<GrayImage>,
    binary: Vec<GrayImage>,
    level: Option<u8>,
    lines: Vec<LineSegment>,
    outcome: FilterOutcome,
    mask: Mask,
}

impl MaskDrawn {
    /// The marker mask.
    #[must_use]
    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Consume the pipeline, keeping every intermediate.
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            shape: self.shape,
            normalized: self.normalized,
            edges: self.edges,
            binary: self.binary,
            threshold: self.level,
            lines: self.lines,
            filter: self.outcome,
            mask: self.mask,
        }
    }
}

// ───────────────────────── PipelineStage trait ────────────────────────

/// Trait implemented by every pipeline stage.
pub trait PipelineStage: Sized {
    /// Short name of this stage (e.g. `"threshold"`).
    const NAME: &str;

    /// Zero-based position of this stage.
    const INDEX: usize;

    /// Metrics describing the work done to reach this state.
    fn metrics(&self) -> StageMetrics;

    /// Run all remaining stages and return the [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a remaining fallible stage fails.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

fn count_on(slices: &[GrayImage]) -> u64 {
    slices
        .iter()
        .flat_map(|s| s.as_raw().iter())
        .map(|&v| u64::from(v == MASK_ON))
        .sum()
}

impl PipelineStage for Normalized {
    const NAME: &str = "normalize";
    const INDEX: usize = 0;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Normalize {
            depth: self.shape.depth,
            height: self.shape.height,
            width: self.shape.width,
            saturated_voxel_count: count_on(&self.normalized),
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.enhance_edges().complete()
    }
}

impl PipelineStage for EdgesEnhanced {
    const NAME: &str = "enhance_edges";
    const INDEX: usize = 1;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::EnhanceEdges {
            closing_size: self.config.edge_closing_size,
            sobel_ksize: self.config.sobel_ksize,
            gradient_max: self.gradient_max,
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.threshold().complete()
    }
}

impl PipelineStage for Thresholded {
    const NAME: &str = "threshold";
    const INDEX: usize = 2;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Threshold {
            level: self.level,
            foreground_voxel_count: count_on(&self.binary),
            total_voxel_count: self.shape.voxel_count() as u64,
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.detect_lines().complete()
    }
}

impl PipelineStage for LinesDetected {
    const NAME: &str = "detect_lines";
    const INDEX: usize = 3;

    fn metrics(&self) -> StageMetrics {
        let mut slices: Vec<i32> = self.lines.iter().map(LineSegment::z).collect();
        slices.dedup();
        StageMetrics::DetectLines {
            segment_count: self.lines.len(),
            slices_with_lines: slices.len(),
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.filter_lines().complete()
    }
}

impl PipelineStage for LinesFiltered {
    const NAME: &str = "filter_lines";
    const INDEX: usize = 4;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::FilterLines {
            input_count: self.lines.len(),
            kept_count: self.outcome.kept.len(),
            rejected: self.outcome.rejected,
            ellipse_fitted: self.outcome.ellipse.is_some(),
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.draw_mask()?.complete()
    }
}

impl PipelineStage for MaskDrawn {
    const NAME: &str = "draw_mask";
    const INDEX: usize = 5;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::DrawMask {
            line_width: self.config.line_width,
            closing_length: self.config.mask_closing_length,
            masked_voxel_count: self.mask.iter().map(|&v| u64::from(v == MASK_ON)).sum(),
            total_voxel_count: self.mask.len() as u64,
        }
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental marker-removal pipeline.
///
/// [`Pipeline::new`] validates the configuration and normalizes the
/// volume; the caller then chains stage methods on the returned
/// [`Normalized`] state.
pub struct Pipeline;

impl Pipeline {
    /// Validate `config` and normalize `volume`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] before touching the
    /// volume when `config` is out of range, and
    /// [`PipelineError::EmptyVolume`] or
    /// [`PipelineError::VolumeTooLarge`] for unusable extents.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T>(volume: ArrayView3<'_, T>, config: PipelineConfig) -> Result<Normalized, PipelineError>
    where
        T: ToPrimitive + Copy,
    {
        config.validate()?;
        let shape = VolumeShape::from_dim(volume.dim());
        let normalized = volume::normalize_volume(volume)?;
        Ok(Normalized {
            config,
            shape,
            normalized,
        })
    }
}
