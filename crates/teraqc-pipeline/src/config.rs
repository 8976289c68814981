//! Pipeline configuration: one explicit record validated at entry.
//!
//! Field names follow Rust conventions. The legacy TeraQC keyword names
//! (`SE1`, `sobelKsize`, `zThickness`, ...) are accepted as serde
//! aliases so existing parameter files keep working.

use serde::{Deserialize, Serialize};

use crate::draw::MaskClosingAxis;
use crate::ellipse::EllipseFitKind;
use crate::types::PipelineError;

/// Largest accepted morphology kernel size.
pub const MAX_KERNEL_SIZE: u32 = 511;

/// Largest accepted Sobel aperture.
pub const MAX_SOBEL_KSIZE: u32 = 31;

/// Parameters for every pipeline stage.
///
/// Construct with [`Default`] and override fields, or parse with
/// [`PipelineConfig::from_json`]. Either way the pipeline calls
/// [`validate`](Self::validate) before any stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Elliptical closing size applied before the gradient.
    #[serde(alias = "SE1")]
    pub edge_closing_size: u32,

    /// Sobel aperture. Odd, `1..=31`; `1` is a central difference.
    #[serde(alias = "sobelKsize")]
    pub sobel_ksize: u32,

    /// Elliptical closing size applied before line detection.
    #[serde(alias = "SE2")]
    pub line_closing_size: u32,

    /// Hough distance resolution in pixels.
    pub rho: f64,

    /// Hough angle resolution in radians.
    pub theta: f64,

    /// Minimum accumulator votes for a line.
    #[serde(alias = "threshold")]
    pub hough_threshold: u32,

    /// Segments shorter than this are discarded by the detector.
    #[serde(alias = "minLineLength")]
    pub min_line_length: u32,

    /// Largest gap bridged between pixels of one segment.
    #[serde(alias = "maxLineGap")]
    pub max_line_gap: u32,

    /// Minimum perpendicular distance from the slice center.
    #[serde(alias = "minDist")]
    pub min_dist: f64,

    /// Maximum acute angle, in degrees, to the dominant orientation.
    #[serde(alias = "angleLim")]
    pub angle_lim: f64,

    /// Lower bound on the normalized ellipse radius of a kept segment.
    #[serde(alias = "zThickness")]
    pub ellipse_ratio: f64,

    /// Optional upper bound on the normalized ellipse radius.
    #[serde(default)]
    pub max_ellipse_ratio: Option<f64>,

    /// Ellipse fitting strategy for the radial filter.
    #[serde(default)]
    pub ellipse_fit: EllipseFitKind,

    /// Mask line width in pixels.
    #[serde(alias = "lineWidth")]
    pub line_width: u32,

    /// Fraction of a segment's length added at each end before drawing.
    #[serde(alias = "extendRatio", default)]
    pub extend_ratio: f64,

    /// Length of the final 1D closing.
    #[serde(alias = "SE3")]
    pub mask_closing_length: u32,

    /// Axis the final closing runs along.
    #[serde(default)]
    pub mask_closing_axis: MaskClosingAxis,
}

impl PipelineConfig {
    /// Default elliptical closing size for edge enhancement.
    pub const DEFAULT_EDGE_CLOSING_SIZE: u32 = 11;
    /// Default Sobel aperture.
    pub const DEFAULT_SOBEL_KSIZE: u32 = 7;
    /// Default elliptical closing size for line detection.
    pub const DEFAULT_LINE_CLOSING_SIZE: u32 = 7;
    /// Default Hough distance resolution.
    pub const DEFAULT_RHO: f64 = 1.0;
    /// Default Hough angle resolution (one degree).
    pub const DEFAULT_THETA: f64 = std::f64::consts::PI / 180.0;
    /// Finest accepted distance resolution. Bounds the accumulator's
    /// distance axis to ten cells per pixel of slice perimeter.
    pub const MIN_RHO: f64 = 0.1;
    /// Finest accepted angle resolution (a tenth of a degree). Bounds the
    /// accumulator's angle axis to 1800 cells.
    pub const MIN_THETA: f64 = std::f64::consts::PI / 1800.0;
    /// Default Hough vote threshold.
    pub const DEFAULT_HOUGH_THRESHOLD: u32 = 100;
    /// Default minimum segment length.
    pub const DEFAULT_MIN_LINE_LENGTH: u32 = 100;
    /// Default maximum gap within a segment.
    pub const DEFAULT_MAX_LINE_GAP: u32 = 1;
    /// Default radial floor, the TeraQC plug-in's `filterMinDistance`.
    pub const DEFAULT_MIN_DIST: f64 = 300.0;
    /// Default orientation tolerance in degrees.
    pub const DEFAULT_ANGLE_LIM: f64 = 5.0;
    /// Default ellipse-ratio threshold.
    pub const DEFAULT_ELLIPSE_RATIO: f64 = 1.0;
    /// Default mask line width.
    pub const DEFAULT_LINE_WIDTH: u32 = 3;
    /// Default segment lengthening ratio.
    pub const DEFAULT_EXTEND_RATIO: f64 = 0.0;
    /// Default final closing length.
    pub const DEFAULT_MASK_CLOSING_LENGTH: u32 = 11;

    /// Parse a configuration from JSON and validate it.
    ///
    /// Every core parameter must be present; `max_ellipse_ratio`,
    /// `ellipse_fit`, `extend_ratio` and `mask_closing_axis` fall back to
    /// their defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the JSON is malformed,
    /// a required field is missing, or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_kernel("edge_closing_size", self.edge_closing_size, MAX_KERNEL_SIZE)?;
        check_kernel("sobel_ksize", self.sobel_ksize, MAX_SOBEL_KSIZE)?;
        check_kernel("line_closing_size", self.line_closing_size, MAX_KERNEL_SIZE)?;
        check_kernel(
            "mask_closing_length",
            self.mask_closing_length,
            MAX_KERNEL_SIZE,
        )?;

        for (name, value) in [
            ("rho", self.rho),
            ("theta", self.theta),
            ("min_dist", self.min_dist),
            ("angle_lim", self.angle_lim),
            ("ellipse_ratio", self.ellipse_ratio),
            ("extend_ratio", self.extend_ratio),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{name} must be finite, got {value}")));
            }
        }

        if self.rho < Self::MIN_RHO {
            return Err(invalid(format!(
                "rho must be at least {}, got {}",
                Self::MIN_RHO,
                self.rho
            )));
        }
        if self.theta < Self::MIN_THETA || self.theta > std::f64::consts::PI {
            return Err(invalid(format!(
                "theta must be in [{}, pi], got {}",
                Self::MIN_THETA,
                self.theta
            )));
        }
        if self.hough_threshold == 0 {
            return Err(invalid("hough_threshold must be at least 1".to_string()));
        }
        if !(0.0..=90.0).contains(&self.angle_lim) {
            return Err(invalid(format!(
                "angle_lim must be in [0, 90] degrees, got {}",
                self.angle_lim
            )));
        }
        if self.min_dist < 0.0 {
            return Err(invalid(format!(
                "min_dist must be non-negative, got {}",
                self.min_dist
            )));
        }
        if self.ellipse_ratio < 0.0 {
            return Err(invalid(format!(
                "ellipse_ratio must be non-negative, got {}",
                self.ellipse_ratio
            )));
        }
        if let Some(max) = self.max_ellipse_ratio
            && !(max.is_finite() && max >= self.ellipse_ratio)
        {
            return Err(invalid(format!(
                "max_ellipse_ratio must be finite and at least ellipse_ratio ({}), got {max}",
                self.ellipse_ratio
            )));
        }
        if self.line_width == 0 {
            return Err(invalid("line_width must be at least 1".to_string()));
        }
        if self.extend_ratio < 0.0 {
            return Err(invalid(format!(
                "extend_ratio must be non-negative, got {}",
                self.extend_ratio
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            edge_closing_size: Self::DEFAULT_EDGE_CLOSING_SIZE,
            sobel_ksize: Self::DEFAULT_SOBEL_KSIZE,
            line_closing_size: Self::DEFAULT_LINE_CLOSING_SIZE,
            rho: Self::DEFAULT_RHO,
            theta: Self::DEFAULT_THETA,
            hough_threshold: Self::DEFAULT_HOUGH_THRESHOLD,
            min_line_length: Self::DEFAULT_MIN_LINE_LENGTH,
            max_line_gap: Self::DEFAULT_MAX_LINE_GAP,
            min_dist: Self::DEFAULT_MIN_DIST,
            angle_lim: Self::DEFAULT_ANGLE_LIM,
            ellipse_ratio: Self::DEFAULT_ELLIPSE_RATIO,
            max_ellipse_ratio: None,
            ellipse_fit: EllipseFitKind::default(),
            line_width: Self::DEFAULT_LINE_WIDTH,
            extend_ratio: Self::DEFAULT_EXTEND_RATIO,
            mask_closing_length: Self::DEFAULT_MASK_CLOSING_LENGTH,
            mask_closing_axis: MaskClosingAxis::default(),
        }
    }
}

const fn invalid(msg: String) -> PipelineError {
    PipelineError::InvalidConfig(msg)
}

fn check_kernel(name: &str, size: u32, max: u32) -> Result<(), PipelineError> {
    if size == 0 || size % 2 == 0 || size > max {
        return Err(invalid(format!(
            "{name} must be a positive odd integer no larger than {max}, got {size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn legacy_json() -> serde_json::Value {
        serde_json::json!({
            "SE1": 11,
            "sobelKsize": 7,
            "SE2": 7,
            "rho": 1.0,
            "theta": std::f64::consts::PI / 180.0,
            "threshold": 100,
            "minLineLength": 100,
            "maxLineGap": 1,
            "minDist": 0.0,
            "angleLim": 5.0,
            "zThickness": 2.0,
            "lineWidth": 3,
            "SE3": 11,
        })
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn defaults_match_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.edge_closing_size, 11);
        assert_eq!(config.sobel_ksize, 7);
        assert_eq!(config.line_closing_size, 7);
        assert!((config.theta - 1.0_f64.to_radians()).abs() < 1e-12);
        assert_eq!(config.hough_threshold, 100);
        assert_eq!(config.line_width, 3);
        assert_eq!(config.mask_closing_length, 11);
        assert_eq!(config.max_ellipse_ratio, None);
        assert_eq!(config.ellipse_fit, EllipseFitKind::Direct);
        assert_eq!(config.mask_closing_axis, MaskClosingAxis::Row);
    }

    #[test]
    fn legacy_keyword_names_accepted() {
        let config = PipelineConfig::from_json(&legacy_json().to_string()).unwrap();
        assert!((config.ellipse_ratio - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.hough_threshold, 100);
        assert!((config.extend_ratio).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_field_rejected() {
        let mut json = legacy_json();
        json.as_object_mut().unwrap().remove("SE3");
        let err = PipelineConfig::from_json(&json.to_string()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref s) if s.contains("SE3") || s.contains("mask_closing_length")));
    }

    #[test]
    fn non_numeric_field_rejected() {
        let mut json = legacy_json();
        json["rho"] = serde_json::json!("one");
        assert!(PipelineConfig::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn even_kernel_rejected() {
        let config = PipelineConfig {
            edge_closing_size: 10,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref s) if s.contains("edge_closing_size")));
    }

    #[test]
    fn oversized_sobel_rejected() {
        let config = PipelineConfig {
            sobel_ksize: 33,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rho_rejected() {
        let config = PipelineConfig {
            rho: 0.0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref s) if s.contains("rho")));
    }

    #[test]
    fn hough_resolution_floors() {
        for (rho, theta) in [
            (1e-300, PipelineConfig::DEFAULT_THETA),
            (0.05, PipelineConfig::DEFAULT_THETA),
            (PipelineConfig::DEFAULT_RHO, 1e-300),
            (PipelineConfig::DEFAULT_RHO, 1e-4),
        ] {
            let config = PipelineConfig {
                rho,
                theta,
                ..PipelineConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "rho {rho} theta {theta} accepted"
            );
        }
        let finest = PipelineConfig {
            rho: PipelineConfig::MIN_RHO,
            theta: PipelineConfig::MIN_THETA,
            ..PipelineConfig::default()
        };
        finest.validate().unwrap();
    }

    #[test]
    fn nan_rejected() {
        let config = PipelineConfig {
            angle_lim: f64::NAN,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn theta_above_pi_rejected() {
        let config = PipelineConfig {
            theta: 4.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_ellipse_ratio_below_lower_bound_rejected() {
        let config = PipelineConfig {
            ellipse_ratio: 2.0,
            max_ellipse_ratio: Some(1.0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            ellipse_ratio: 1.0,
            max_ellipse_ratio: Some(3.0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_line_width_rejected() {
        let config = PipelineConfig {
            line_width: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let config = PipelineConfig {
            max_ellipse_ratio: Some(4.0),
            ellipse_fit: EllipseFitKind::Moments,
            mask_closing_axis: MaskClosingAxis::Depth,
            extend_ratio: 0.1,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }
}
