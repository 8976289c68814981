//! In-memory volumes as loaded from disk.

use std::fmt;
use std::str::FromStr;

use ndarray::Array3;
use teraqc_pipeline::{Mask, MaskPolicy, PipelineError};

/// A grayscale volume in one of the supported sample types, indexed
/// `(z, y, x)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Volume {
    /// 8-bit samples.
    U8(Array3<u8>),
    /// 16-bit samples.
    U16(Array3<u16>),
}

impl Volume {
    /// Extents as `(z, y, x)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            Self::U8(a) => a.dim(),
            Self::U16(a) => a.dim(),
        }
    }

    /// Bits per sample.
    #[must_use]
    pub const fn bit_depth(&self) -> u8 {
        match self {
            Self::U8(_) => 8,
            Self::U16(_) => 16,
        }
    }

    /// Apply `mask` with `policy`, keeping the sample type.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the extents differ.
    pub fn apply_mask(&self, mask: &Mask, policy: MaskPolicy) -> Result<Self, PipelineError> {
        Ok(match self {
            Self::U8(a) => Self::U8(teraqc_pipeline::apply_mask(a.view(), mask, policy)?),
            Self::U16(a) => Self::U16(teraqc_pipeline::apply_mask(a.view(), mask, policy)?),
        })
    }
}

impl From<Array3<u8>> for Volume {
    fn from(array: Array3<u8>) -> Self {
        Self::U8(array)
    }
}

impl From<Array3<u16>> for Volume {
    fn from(array: Array3<u16>) -> Self {
        Self::U16(array)
    }
}

/// Sample types a [`Volume`] can hold.
pub trait Sample: Copy + Default + 'static {
    /// Bits per sample.
    const BIT_DEPTH: u8;

    /// Take the typed array out of `volume` if it holds this type.
    fn unwrap_volume(volume: Volume) -> Option<Array3<Self>>;
}

impl Sample for u8 {
    const BIT_DEPTH: u8 = 8;

    fn unwrap_volume(volume: Volume) -> Option<Array3<Self>> {
        match volume {
            Volume::U8(a) => Some(a),
            Volume::U16(_) => None,
        }
    }
}

impl Sample for u16 {
    const BIT_DEPTH: u8 = 16;

    fn unwrap_volume(volume: Volume) -> Option<Array3<Self>> {
        match volume {
            Volume::U16(a) => Some(a),
            Volume::U8(_) => None,
        }
    }
}

/// Physical voxel size along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    /// Column spacing.
    pub x: f64,
    /// Row spacing.
    pub y: f64,
    /// Slice spacing.
    pub z: f64,
}

impl Default for Spacing {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

impl fmt::Display for Spacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl FromStr for Spacing {
    type Err = String;

    /// Parse `x,y,z`; every component must be positive and finite.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, z] = parts.as_slice() else {
            return Err(format!("expected three comma-separated values, got {s:?}"));
        };
        let parse = |v: &str| -> Result<f64, String> {
            let value: f64 = v.parse().map_err(|e| format!("{v:?}: {e}"))?;
            if value.is_finite() && value > 0.0 {
                Ok(value)
            } else {
                Err(format!("spacing must be positive and finite, got {value}"))
            }
        };
        Ok(Self {
            x: parse(x)?,
            y: parse(y)?,
            z: parse(z)?,
        })
    }
}

/// A volume together with its voxel spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVolume {
    /// Sample data.
    pub volume: Volume,
    /// Voxel size.
    pub spacing: Spacing,
}
