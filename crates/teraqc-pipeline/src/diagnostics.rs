//! Pipeline diagnostics: timing and counts for each stage.
//!
//! Intended for parameter tuning against real volumes. Timestamps come
//! from a caller-supplied [`Clock`] so the library stays free of any
//! particular time source.
//!
//! Durations are serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use ndarray::ArrayView3;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::filter::RejectionCounts;
use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of monotonic timestamps.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// The current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 0: configuration check and normalization.
    pub normalize: StageDiagnostics,
    /// Stage 1: closing and gradient magnitude.
    pub enhance_edges: StageDiagnostics,
    /// Stage 2: pooled Otsu threshold.
    pub threshold: StageDiagnostics,
    /// Stage 3: per-slice line detection.
    pub detect_lines: StageDiagnostics,
    /// Stage 4: radial and orientation filtering.
    pub filter_lines: StageDiagnostics,
    /// Stage 5: mask rasterization and closing.
    pub draw_mask: StageDiagnostics,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Normalization metrics.
    Normalize {
        /// Number of slices.
        depth: usize,
        /// Slice height in pixels.
        height: usize,
        /// Slice width in pixels.
        width: usize,
        /// Voxels that mapped to 255.
        saturated_voxel_count: u64,
    },
    /// Edge enhancement metrics.
    EnhanceEdges {
        /// Closing kernel size.
        closing_size: u32,
        /// Sobel aperture.
        sobel_ksize: u32,
        /// Largest gradient magnitude before quantization.
        gradient_max: f32,
    },
    /// Thresholding metrics.
    Threshold {
        /// Pooled Otsu level, `None` for a constant edge response.
        level: Option<u8>,
        /// Voxels above the level.
        foreground_voxel_count: u64,
        /// Total voxel count.
        total_voxel_count: u64,
    },
    /// Line detection metrics.
    DetectLines {
        /// Segments found across the stack.
        segment_count: usize,
        /// Slices contributing at least one segment.
        slices_with_lines: usize,
    },
    /// Filtering metrics.
    FilterLines {
        /// Segments entering the filter.
        input_count: usize,
        /// Segments kept.
        kept_count: usize,
        /// Rejections by criterion.
        rejected: RejectionCounts,
        /// Whether a distance/depth ellipse could be fitted.
        ellipse_fitted: bool,
    },
    /// Mask drawing metrics.
    DrawMask {
        /// Drawn line width.
        line_width: u32,
        /// Final closing length.
        closing_length: u32,
        /// Voxels set in the final mask.
        masked_voxel_count: u64,
        /// Total voxel count.
        total_voxel_count: u64,
    },
}

/// High-level summary counts for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Number of slices.
    pub depth: usize,
    /// Slice height in pixels.
    pub height: usize,
    /// Slice width in pixels.
    pub width: usize,
    /// Segments found by the detector.
    pub segment_count: usize,
    /// Segments kept by the filter.
    pub kept_count: usize,
    /// Voxels set in the final mask.
    pub masked_voxel_count: u64,
}

impl PipelineDiagnostics {
    /// Stages in pipeline order with their display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Normalize", &self.normalize),
            ("Enhance Edges", &self.enhance_edges),
            ("Threshold", &self.threshold),
            ("Detect Lines", &self.detect_lines),
            ("Filter Lines", &self.filter_lines),
            ("Draw Mask", &self.draw_mask),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Volume: {}x{}x{} (z x y x x)",
            self.summary.depth, self.summary.height, self.summary.width,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Segments: {} detected, {} kept  |  Masked voxels: {}",
            self.summary.segment_count, self.summary.kept_count, self.summary.masked_voxel_count,
        ));

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            saturated_voxel_count,
            ..
        } => format!("saturated={saturated_voxel_count}"),
        StageMetrics::EnhanceEdges {
            closing_size,
            sobel_ksize,
            gradient_max,
        } => format!("close={closing_size} ksize={sobel_ksize} max={gradient_max:.1}"),
        StageMetrics::Threshold {
            level,
            foreground_voxel_count,
            total_voxel_count,
        } => {
            let level = level.map_or_else(|| "none".to_string(), |l| l.to_string());
            format!(
                "level={level} fg={foreground_voxel_count} ({:.2}%)",
                percent(*foreground_voxel_count, *total_voxel_count),
            )
        }
        StageMetrics::DetectLines {
            segment_count,
            slices_with_lines,
        } => format!("{segment_count} segments on {slices_with_lines} slices"),
        StageMetrics::FilterLines {
            input_count,
            kept_count,
            rejected,
            ellipse_fitted,
        } => format!(
            "{input_count}->{kept_count} (radial={} orientation={} degenerate={}) ellipse={}",
            rejected.radial,
            rejected.orientation,
            rejected.degenerate,
            if *ellipse_fitted { "yes" } else { "no" },
        ),
        StageMetrics::DrawMask {
            line_width,
            closing_length,
            masked_voxel_count,
            total_voxel_count,
        } => format!(
            "width={line_width} close={closing_length} masked={masked_voxel_count} ({:.2}%)",
            percent(*masked_voxel_count, *total_voxel_count),
        ),
    }
}

/// Run `step` and time it, recording the metrics of the stage it returns.
fn timed<C, S, F>(clock: &C, step: F) -> Result<(S, StageDiagnostics), PipelineError>
where
    C: Clock,
    S: PipelineStage,
    F: FnOnce() -> Result<S, PipelineError>,
{
    let start = clock.now();
    let stage = step()?;
    let duration = clock.elapsed(&start);
    log::debug!("stage {} finished in {duration:?}", S::NAME);
    let metrics = stage.metrics();
    Ok((stage, StageDiagnostics { duration, metrics }))
}

/// Run the full pipeline, timing every stage.
///
/// # Errors
///
/// Same conditions as [`Pipeline::new`] and
/// [`LinesFiltered::draw_mask`](crate::pipeline::LinesFiltered::draw_mask).
pub fn process_staged_with_diagnostics<T, C>(
    volume: ArrayView3<'_, T>,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError>
where
    T: ToPrimitive + Copy,
    C: Clock,
{
    let start = clock.now();

    let (normalized, normalize) = timed(clock, || Pipeline::new(volume, config.clone()))?;
    let (enhanced, enhance_edges) = timed(clock, || Ok(normalized.enhance_edges()))?;
    let (thresholded, threshold) = timed(clock, || Ok(enhanced.threshold()))?;
    let (detected, detect_lines) = timed(clock, || Ok(thresholded.detect_lines()))?;
    let (filtered, filter_lines) = timed(clock, || Ok(detected.filter_lines()))?;
    let (drawn, draw_mask) = timed(clock, || filtered.draw_mask())?;

    let staged = drawn.into_result();
    let total_duration = clock.elapsed(&start);

    let summary = PipelineSummary {
        depth: staged.shape.depth,
        height: staged.shape.height,
        width: staged.shape.width,
        segment_count: staged.lines.len(),
        kept_count: staged.filter.kept.len(),
        masked_voxel_count: match draw_mask.metrics {
            StageMetrics::DrawMask {
                masked_voxel_count, ..
            } => masked_voxel_count,
            _ => 0,
        },
    };
    log::info!(
        "pipeline finished in {total_duration:?}: {} of {} segments kept",
        summary.kept_count,
        summary.segment_count,
    );

    Ok((
        staged,
        PipelineDiagnostics {
            normalize,
            enhance_edges,
            threshold,
            detect_lines,
            filter_lines,
            draw_mask,
            total_duration,
            summary,
        },
    ))
}
