//! Global Otsu thresholding over a whole slice stack.
//!
//! The histogram is pooled across every slice so all slices share one
//! level. Ties between equal inter-class variances keep the lowest level,
//! the same convention `imageproc::contrast::otsu_level` follows.

use image::GrayImage;

use crate::types::MASK_ON;

/// 256-bin intensity histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [u64; 256],
}

impl Histogram {
    /// Pool the histogram of every slice.
    #[must_use]
    pub fn from_slices(slices: &[GrayImage]) -> Self {
        let mut counts = [0_u64; 256];
        for slice in slices {
            for &v in slice.as_raw() {
                counts[usize::from(v)] += 1;
            }
        }
        Self { counts }
    }

    /// Count per intensity level.
    #[must_use]
    pub const fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    /// Total number of samples.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of levels with at least one sample.
    #[must_use]
    pub fn occupied_bins(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// Otsu's level: the split maximizing `w0 * w1 * (mu0 - mu1)^2`,
    /// where class 0 is every level `<= t`.
    ///
    /// Returns `None` when fewer than two levels are occupied, since no
    /// split separates anything.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn otsu_level(&self) -> Option<u8> {
        if self.occupied_bins() < 2 {
            return None;
        }
        let total = self.total();
        let sum: u64 = self
            .counts
            .iter()
            .enumerate()
            .map(|(level, &count)| level as u64 * count)
            .sum();

        let mut best_level = 0_usize;
        let mut best_variance = 0.0_f64;
        let mut weight_bg = 0_u64;
        let mut sum_bg = 0_u64;

        for (level, &count) in self.counts.iter().enumerate() {
            weight_bg += count;
            if weight_bg == 0 {
                continue;
            }
            let weight_fg = total - weight_bg;
            if weight_fg == 0 {
                break;
            }
            sum_bg += level as u64 * count;

            let mean_bg = sum_bg as f64 / weight_bg as f64;
            let mean_fg = (sum - sum_bg) as f64 / weight_fg as f64;
            let diff = mean_bg - mean_fg;
            let variance = weight_bg as f64 * weight_fg as f64 * diff * diff;
            if variance > best_variance {
                best_level = level;
                best_variance = variance;
            }
        }
        // `level` indexes a 256-entry array.
        Some(best_level as u8)
    }
}

/// Binarize one slice: values above `level` become [`MASK_ON`].
#[must_use]
pub fn binarize(slice: &GrayImage, level: u8) -> GrayImage {
    let mut out = slice.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { MASK_ON } else { 0 };
    }
    out
}

/// Threshold a stack with one pooled Otsu level.
///
/// A constant stack has no level and becomes all background.
#[must_use]
pub fn threshold_stack(slices: &[GrayImage]) -> (Option<u8>, Vec<GrayImage>) {
    let histogram = Histogram::from_slices(slices);
    let level = histogram.otsu_level();
    let binary = match level {
        Some(level) => {
            log::debug!("global otsu level {level}");
            slices.iter().map(|s| binarize(s, level)).collect()
        }
        None => {
            log::debug!("edge response is constant; thresholding to background");
            slices
                .iter()
                .map(|s| GrayImage::new(s.width(), s.height()))
                .collect()
        }
    };
    (level, binary)
}
