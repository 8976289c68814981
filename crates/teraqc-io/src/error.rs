use std::path::PathBuf;

use teraqc_pipeline::PipelineError;

/// Errors from reading or writing volumes on disk.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Filesystem access failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TIFF codec rejected a file.
    #[error("{}: {source}", path.display())]
    Tiff {
        /// File being decoded or encoded.
        path: PathBuf,
        /// Underlying error.
        source: tiff::TiffError,
    },

    /// Directory traversal failed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// A folder that must hold tiles or tile folders is empty.
    #[error("{} contains no tiles", .0.display())]
    EmptyDirectory(PathBuf),

    /// Tile extents do not line up along a shared axis.
    #[error("{}: {detail}", path.display())]
    InconsistentTiles {
        /// Tile or folder where the mismatch was found.
        path: PathBuf,
        /// Which extents disagree.
        detail: String,
    },

    /// A page is not single-channel 8 or 16 bit.
    #[error("{}: unsupported sample format {format}", path.display())]
    UnsupportedSampleFormat {
        /// Offending file.
        path: PathBuf,
        /// Description of the format found.
        format: String,
    },

    /// Tiles of one volume use different bit depths.
    #[error("{}: expected {expected}-bit samples, found {found}-bit", path.display())]
    MixedBitDepth {
        /// Offending tile.
        path: PathBuf,
        /// Bit depth of the first tile.
        expected: u8,
        /// Bit depth of this tile.
        found: u8,
    },

    /// Assembled extents disagree with the `RES(YxXxZ)` folder name.
    #[error("{}: folder name promises {expected:?} (y, x, z), tiles assemble to {found:?}", path.display())]
    ShapeMismatch {
        /// The resolution folder.
        path: PathBuf,
        /// Extents parsed from the folder name.
        expected: (usize, usize, usize),
        /// Extents of the assembled volume.
        found: (usize, usize, usize),
    },

    /// The pipeline rejected the loaded data.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        Self::Tiff {
            path: path.into(),
            source,
        }
    }
}
