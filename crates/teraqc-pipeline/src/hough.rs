//! Progressive probabilistic Hough transform.
//!
//! Follows the Matas, Galambos and Kittler scheme: each foreground pixel
//! votes in turn, and as soon as one accumulator cell reaches the
//! threshold the corresponding line is walked in both directions,
//! bridging gaps up to `max_line_gap`. Pixels on the walked corridor are
//! consumed, and if the segment is long enough their votes are withdrawn.
//!
//! Pixels are visited in raster order rather than at random so the
//! output is reproducible, and only pixels that have already voted are
//! un-voted.

use std::f64::consts::PI;

use image::GrayImage;

use crate::config::PipelineConfig;
use crate::types::LineSegment;

/// Fixed-point fraction bits used while walking a line.
const SHIFT: u32 = 16;

/// Parameters of the line detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    /// Distance resolution in pixels.
    pub rho: f64,
    /// Angle resolution in radians.
    pub theta: f64,
    /// Minimum votes for a line.
    pub threshold: u32,
    /// Minimum extent of a segment along x or y.
    pub min_line_length: u32,
    /// Largest run of background pixels bridged inside a segment.
    pub max_line_gap: u32,
}

impl HoughParams {
    /// Extract detector parameters from a pipeline configuration.
    #[must_use]
    pub const fn from_config(config: &PipelineConfig) -> Self {
        Self {
            rho: config.rho,
            theta: config.theta,
            threshold: config.hough_threshold,
            min_line_length: config.min_line_length,
            max_line_gap: config.max_line_gap,
        }
    }
}

/// Fixed-point cursor along a line, stepping one pixel on the major axis.
#[derive(Debug, Clone, Copy)]
struct Walk {
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    x_major: bool,
}

impl Walk {
    /// Forward and backward cursors through `(x, y)` along the line whose
    /// normal makes `angle` with the x axis.
    #[allow(clippy::cast_possible_truncation)]
    fn pair(x: i64, y: i64, angle: f64) -> [Self; 2] {
        let one = f64::from(1_u32 << SHIFT);
        let half = 1_i64 << (SHIFT - 1);
        let a = -angle.sin();
        let b = angle.cos();
        let forward = if a.abs() > b.abs() {
            Self {
                x,
                y: (y << SHIFT) + half,
                dx: if a > 0.0 { 1 } else { -1 },
                dy: (b * one / a.abs()).round() as i64,
                x_major: true,
            }
        } else {
            Self {
                x: (x << SHIFT) + half,
                y,
                dx: (a * one / b.abs()).round() as i64,
                dy: if b > 0.0 { 1 } else { -1 },
                x_major: false,
            }
        };
        let backward = Self {
            dx: -forward.dx,
            dy: -forward.dy,
            ..forward
        };
        [forward, backward]
    }

    const fn pixel(&self) -> (i64, i64) {
        if self.x_major {
            (self.x, self.y >> SHIFT)
        } else {
            (self.x >> SHIFT, self.y)
        }
    }

    const fn step(&mut self) {
        self.x += self.dx;
        self.y += self.dy;
    }
}

/// Accumulator over `(angle, distance)` cells.
struct Accumulator {
    trig: Vec<(f64, f64)>,
    num_rho: usize,
    offset: i64,
    cells: Vec<u32>,
    /// Per-angle counts of the last vote, reused between pixels.
    votes: Vec<u32>,
}

impl Accumulator {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn new(width: usize, height: usize, rho: f64, theta: f64) -> Self {
        let irho = 1.0 / rho;
        let num_angle = ((PI / theta).round() as usize).max(1);
        let num_rho = ((((width + height) * 2 + 1) as f64 / rho).round() as usize).max(1);
        let trig = (0..num_angle)
            .map(|n| {
                let angle = n as f64 * theta;
                (angle.cos() * irho, angle.sin() * irho)
            })
            .collect();
        Self {
            trig,
            num_rho,
            offset: ((num_rho - 1) / 2) as i64,
            cells: vec![0; num_angle * num_rho],
            votes: vec![0; num_angle],
        }
    }

    fn num_angle(&self) -> usize {
        self.trig.len()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn cell(&self, x: i64, y: i64, n: usize) -> Option<usize> {
        let (c, s) = self.trig[n];
        let r = (x as f64).mul_add(c, y as f64 * s).round() as i64 + self.offset;
        usize::try_from(r)
            .ok()
            .filter(|&r| r < self.num_rho)
            .map(|r| n * self.num_rho + r)
    }

    /// Add the votes of `(x, y)`; returns the winning angle index and
    /// its vote count.
    ///
    /// Adjacent angles often tie on a straight run of pixels; the winner
    /// is the middle of the first run of tied maxima.
    fn vote(&mut self, x: i64, y: i64) -> (usize, u32) {
        for n in 0..self.num_angle() {
            self.votes[n] = match self.cell(x, y, n) {
                Some(i) => {
                    self.cells[i] += 1;
                    self.cells[i]
                }
                None => 0,
            };
        }
        let votes = &self.votes;
        let best = votes.iter().copied().max().unwrap_or(0);
        let first = votes.iter().position(|&v| v == best).unwrap_or(0);
        let run = votes[first..].iter().take_while(|&&v| v == best).count();
        (first + run.saturating_sub(1) / 2, best)
    }

    fn unvote(&mut self, x: i64, y: i64) {
        for n in 0..self.num_angle() {
            if let Some(i) = self.cell(x, y, n) {
                self.cells[i] = self.cells[i].saturating_sub(1);
            }
        }
    }
}

/// Detect line segments in a binary slice and lift them onto slice `z`.
///
/// Any non-zero pixel is foreground.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn probabilistic_hough(image: &GrayImage, params: &HoughParams, z: i32) -> Vec<LineSegment> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut accumulator = Accumulator::new(width, height, params.rho, params.theta);
    let mut mask: Vec<bool> = image.as_raw().iter().map(|&v| v > 0).collect();
    let mut voted = vec![false; mask.len()];
    let min_length = i64::from(params.min_line_length);
    let max_gap = params.max_line_gap;

    let index = |(px, py): (i64, i64)| -> Option<usize> {
        let (px, py) = (usize::try_from(px).ok()?, usize::try_from(py).ok()?);
        (px < width && py < height).then_some(py * width + px)
    };

    let mut lines = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !mask[idx] {
                continue;
            }
            let (px, py) = (x as i64, y as i64);
            voted[idx] = true;
            let (best_angle, votes) = accumulator.vote(px, py);
            if votes < params.threshold {
                continue;
            }

            let walks = Walk::pair(px, py, best_angle as f64 * params.theta);

            let mut ends = [(px, py); 2];
            for (end, walk) in ends.iter_mut().zip(walks) {
                let mut walk = walk;
                let mut gap = 0;
                while let Some(i) = index(walk.pixel()) {
                    if mask[i] {
                        gap = 0;
                        *end = walk.pixel();
                    } else {
                        gap += 1;
                        if gap > max_gap {
                            break;
                        }
                    }
                    walk.step();
                }
            }

            let good = (ends[1].0 - ends[0].0).abs() >= min_length
                || (ends[1].1 - ends[0].1).abs() >= min_length;

            for (end, walk) in ends.iter().zip(walks) {
                let mut walk = walk;
                while let Some(i) = index(walk.pixel()) {
                    if mask[i] {
                        if good && voted[i] {
                            let (wx, wy) = walk.pixel();
                            accumulator.unvote(wx, wy);
                            voted[i] = false;
                        }
                        mask[i] = false;
                    }
                    if walk.pixel() == *end {
                        break;
                    }
                    walk.step();
                }
            }

            if good {
                let coords = [ends[0].0, ends[0].1, ends[1].0, ends[1].1].map(i32::try_from);
                if let [Ok(x1), Ok(y1), Ok(x2), Ok(y2)] = coords {
                    lines.push(LineSegment::on_slice(x1, y1, x2, y2, z));
                }
            }
        }
    }
    lines
}
