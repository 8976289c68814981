//! teraqc: find and mask linear fiducial markers in microscopy volumes.
//!
//! Loads a resolution directory of tiles (or a single TIFF stack), runs
//! the marker-removal pipeline with per-stage diagnostics, and writes the
//! mask and optionally the cleaned volume as TIFF stacks.
//!
//! # Usage
//!
//! ```text
//! teraqc [OPTIONS] --output <MASK> <INPUT>
//! ```
//!
//! Logging verbosity is controlled with `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use teraqc_io::{LoadedVolume, Spacing, Volume};
use teraqc_pipeline::diagnostics::{Clock, PipelineDiagnostics, process_staged_with_diagnostics};
use teraqc_pipeline::{
    EllipseFitKind, MaskClosingAxis, MaskPolicy, PipelineConfig, PipelineError, StagedResult,
};

/// Detect linear fiducial markers in a tiled microscopy volume and write
/// a mask covering them.
#[derive(Parser)]
#[command(name = "teraqc", version)]
struct Cli {
    /// Resolution directory (`RES(HxWxD)/y/x/z.tif`) or a single TIFF stack.
    input: PathBuf,

    /// Where to write the 8-bit marker mask.
    #[arg(long, short)]
    output: PathBuf,

    /// Also write the input with the mask applied.
    #[arg(long)]
    cleaned: Option<PathBuf>,

    /// What `--cleaned` keeps: everything but the markers, or only them.
    #[arg(long, value_enum, default_value_t = Policy::Erase)]
    policy: Policy,

    /// Voxel spacing `x,y,z` written to the outputs, overriding the input's.
    #[arg(long)]
    spacing: Option<Spacing>,

    /// Elliptical closing size before the gradient.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EDGE_CLOSING_SIZE)]
    edge_closing_size: u32,

    /// Sobel aperture (odd, 1..=31).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SOBEL_KSIZE)]
    sobel_ksize: u32,

    /// Elliptical closing size before line detection.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_LINE_CLOSING_SIZE)]
    line_closing_size: u32,

    /// Hough distance resolution in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_RHO)]
    rho: f64,

    /// Hough angle resolution in radians.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_THETA)]
    theta: f64,

    /// Hough vote threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_HOUGH_THRESHOLD)]
    hough_threshold: u32,

    /// Minimum segment extent along x or y.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_LINE_LENGTH)]
    min_line_length: u32,

    /// Largest gap bridged inside a segment.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_LINE_GAP)]
    max_line_gap: u32,

    /// Minimum distance of a kept line from the slice center.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_DIST)]
    min_dist: f64,

    /// Largest angle in degrees from the dominant orientation.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ANGLE_LIM)]
    angle_lim: f64,

    /// Minimum normalized radius in the distance/depth ellipse.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ELLIPSE_RATIO)]
    ellipse_ratio: f64,

    /// Maximum normalized radius in the distance/depth ellipse.
    #[arg(long)]
    max_ellipse_ratio: Option<f64>,

    /// Ellipse fitting strategy.
    #[arg(long, value_enum, default_value_t = EllipseFit::Direct)]
    ellipse_fit: EllipseFit,

    /// Width of the drawn mask lines.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_LINE_WIDTH)]
    line_width: u32,

    /// Lengthen each kept segment by this fraction at both ends.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EXTEND_RATIO)]
    extend_ratio: f64,

    /// Length of the final mask closing.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MASK_CLOSING_LENGTH)]
    mask_closing_length: u32,

    /// Axis of the final mask closing.
    #[arg(long, value_enum, default_value_t = ClosingAxis::Row)]
    mask_closing_axis: ClosingAxis,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Both field names and the legacy keywords (`SE1`, `zThickness`, ...)
    /// are accepted.
    #[arg(long)]
    config_json: Option<String>,

    /// Number of runs for timing; outputs are written after the first.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Ellipse fitting strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum EllipseFit {
    /// Direct least-squares conic fit.
    Direct,
    /// Covariance (moments) ellipse.
    Moments,
}

/// Final closing axis selection.
#[derive(Clone, Copy, ValueEnum)]
enum ClosingAxis {
    /// Along rows within each slice.
    Row,
    /// Along z through the stack.
    Depth,
}

/// Cleaned-volume policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Zero the voxels under the mask.
    Erase,
    /// Keep only the voxels under the mask.
    Retain,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return PipelineConfig::from_json(json)
            .map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let config = PipelineConfig {
        edge_closing_size: cli.edge_closing_size,
        sobel_ksize: cli.sobel_ksize,
        line_closing_size: cli.line_closing_size,
        rho: cli.rho,
        theta: cli.theta,
        hough_threshold: cli.hough_threshold,
        min_line_length: cli.min_line_length,
        max_line_gap: cli.max_line_gap,
        min_dist: cli.min_dist,
        angle_lim: cli.angle_lim,
        ellipse_ratio: cli.ellipse_ratio,
        max_ellipse_ratio: cli.max_ellipse_ratio,
        ellipse_fit: match cli.ellipse_fit {
            EllipseFit::Direct => EllipseFitKind::Direct,
            EllipseFit::Moments => EllipseFitKind::Moments,
        },
        line_width: cli.line_width,
        extend_ratio: cli.extend_ratio,
        mask_closing_length: cli.mask_closing_length,
        mask_closing_axis: match cli.mask_closing_axis {
            ClosingAxis::Row => MaskClosingAxis::Row,
            ClosingAxis::Depth => MaskClosingAxis::Depth,
        },
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

const fn policy(cli: &Cli) -> MaskPolicy {
    match cli.policy {
        Policy::Erase => MaskPolicy::Erase,
        Policy::Retain => MaskPolicy::Retain,
    }
}

fn run(
    loaded: &LoadedVolume,
    config: &PipelineConfig,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    match &loaded.volume {
        Volume::U8(a) => process_staged_with_diagnostics(a.view(), config, &StdClock),
        Volume::U16(a) => process_staged_with_diagnostics(a.view(), config, &StdClock),
    }
}

/// Write the mask and, if requested, the cleaned volume.
fn write_outputs(
    cli: &Cli,
    loaded: &LoadedVolume,
    staged: StagedResult,
    spacing: Spacing,
) -> Result<(), String> {
    let cleaned = cli
        .cleaned
        .as_ref()
        .map(|path| {
            loaded
                .volume
                .apply_mask(&staged.mask, policy(cli))
                .map(|volume| (path, volume))
        })
        .transpose()
        .map_err(|e| format!("Error applying mask: {e}"))?;

    teraqc_io::write_stack(&cli.output, &Volume::U8(staged.mask), spacing)
        .map_err(|e| format!("Error writing mask: {e}"))?;
    log::info!("mask written to {}", cli.output.display());

    if let Some((path, volume)) = cleaned {
        teraqc_io::write_stack(path, &volume, spacing)
            .map_err(|e| format!("Error writing cleaned volume: {e}"))?;
        log::info!("cleaned volume written to {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let loaded = match teraqc_io::load_volume(&cli.input) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading {}: {e}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };
    let spacing = cli.spacing.unwrap_or(loaded.spacing);

    let (depth, height, width) = loaded.volume.dim();
    eprintln!(
        "Volume: {} ({depth}x{height}x{width}, {}-bit, spacing {spacing})",
        cli.input.display(),
        loaded.volume.bit_depth(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run_index in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run_index + 1, cli.runs);
        }

        let (staged, diagnostics) = match run(&loaded, &config) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
        }

        if run_index == 0
            && let Err(msg) = write_outputs(&cli, &loaded, staged, spacing)
        {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated timings across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    let Some(first) = all_diagnostics.first() else {
        println!("Warning: no diagnostics to summarize");
        return;
    };

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();
    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for (index, (name, _)) in first.stages().iter().enumerate() {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| d.stages()[index].1.duration.as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("teraqc").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flag_defaults_match_pipeline_defaults() {
        let cli = parse(&["in.tif", "--output", "mask.tif"]);
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn flags_override_fields() {
        let cli = parse(&[
            "in.tif",
            "-o",
            "mask.tif",
            "--sobel-ksize",
            "5",
            "--mask-closing-axis",
            "depth",
            "--max-ellipse-ratio",
            "3.5",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.sobel_ksize, 5);
        assert_eq!(config.mask_closing_axis, MaskClosingAxis::Depth);
        assert_eq!(config.max_ellipse_ratio, Some(3.5));
    }

    #[test]
    fn invalid_flags_are_reported() {
        let cli = parse(&["in.tif", "-o", "mask.tif", "--sobel-ksize", "4"]);
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn config_json_overrides_flags() {
        let json = serde_json::to_string(&PipelineConfig {
            line_width: 7,
            ..PipelineConfig::default()
        })
        .unwrap();
        let cli = parse(&["in.tif", "-o", "m.tif", "--line-width", "1", "--config-json", &json]);
        assert_eq!(config_from_cli(&cli).unwrap().line_width, 7);
    }

    #[test]
    fn spacing_flag_parses() {
        let cli = parse(&["in.tif", "-o", "m.tif", "--spacing", "0.5,0.5,2"]);
        assert_eq!(cli.spacing.map(|s| s.z), Some(2.0));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
