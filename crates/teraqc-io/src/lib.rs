//! teraqc-io: volumes on disk.
//!
//! Loads tiled resolution directories and single multi-page TIFF stacks
//! into [`Volume`]s, and writes volumes and masks back out as TIFF
//! stacks. All processing lives in `teraqc-pipeline`.

pub mod error;
pub mod loader;
pub mod stack;
pub mod volume;

pub use error::IoError;
pub use loader::{load_resolution_dir, load_volume};
pub use stack::{read_stack, write_stack};
pub use volume::{LoadedVolume, Sample, Spacing, Volume};
