//! Reassemble a tiled resolution directory into one volume.
//!
//! The layout is three levels deep:
//!
//! ```text
//! RES(HxWxD)/            height x width x depth of the whole volume
//!   000000/              one folder per tile row (y)
//!     000000_000000/     one folder per tile column (x)
//!       000000_000000_000000.tif   tiles along z, each a TIFF stack
//! ```
//!
//! Entries are visited in file-name order at every level.

use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis};
use walkdir::WalkDir;

use crate::error::IoError;
use crate::stack::read_stack;
use crate::volume::{LoadedVolume, Sample, Spacing, Volume};

/// A tile column: its folder and the tiles it holds along z.
type Column = (PathBuf, Vec<(PathBuf, Volume)>);

/// A tile row: its folder and its columns along x.
type Row = (PathBuf, Vec<Column>);

/// Load a single stack or a resolution directory.
///
/// # Errors
///
/// Returns [`IoError::Io`] if `path` cannot be inspected, otherwise the
/// errors of [`read_stack`] or [`load_resolution_dir`].
pub fn load_volume(path: &Path) -> Result<LoadedVolume, IoError> {
    let metadata = std::fs::metadata(path).map_err(|e| IoError::io(path, e))?;
    if metadata.is_dir() {
        load_resolution_dir(path)
    } else {
        read_stack(path)
    }
}

/// Load every tile under `root` and join them into one volume.
///
/// Tiles inside a column folder are joined along z, columns along x and
/// rows along y. Spacing comes from the first tile's X/Y resolution;
/// z spacing is `1.0`.
///
/// # Errors
///
/// Returns [`IoError::EmptyDirectory`] if any level has nothing to
/// load, [`IoError::MixedBitDepth`] or [`IoError::InconsistentTiles`]
/// if tiles do not fit together, and [`IoError::ShapeMismatch`] if a
/// `RES(HxWxD)` folder name disagrees with the assembled extents.
pub fn load_resolution_dir(root: &Path) -> Result<LoadedVolume, IoError> {
    let row_dirs = entries(root, true)?;
    if row_dirs.is_empty() {
        return Err(IoError::EmptyDirectory(root.to_path_buf()));
    }

    let mut rows: Vec<Row> = Vec::with_capacity(row_dirs.len());
    let mut spacing = None;
    for row_dir in row_dirs {
        let column_dirs = entries(&row_dir, true)?;
        if column_dirs.is_empty() {
            return Err(IoError::EmptyDirectory(row_dir));
        }
        let mut columns = Vec::with_capacity(column_dirs.len());
        for column_dir in column_dirs {
            let tile_paths: Vec<PathBuf> = entries(&column_dir, false)?
                .into_iter()
                .filter(|p| is_tiff(p))
                .collect();
            if tile_paths.is_empty() {
                return Err(IoError::EmptyDirectory(column_dir));
            }
            let mut tiles = Vec::with_capacity(tile_paths.len());
            for tile_path in tile_paths {
                let loaded = read_stack(&tile_path)?;
                if spacing.is_none() {
                    spacing = Some(Spacing {
                        z: 1.0,
                        ..loaded.spacing
                    });
                }
                tiles.push((tile_path, loaded.volume));
            }
            columns.push((column_dir, tiles));
        }
        rows.push((row_dir, columns));
    }

    let first_is_u16 = matches!(
        rows.first()
            .and_then(|(_, columns)| columns.first())
            .and_then(|(_, tiles)| tiles.first()),
        Some((_, Volume::U16(_)))
    );
    let volume = if first_is_u16 {
        Volume::U16(assemble::<u16>(root, rows)?)
    } else {
        Volume::U8(assemble::<u8>(root, rows)?)
    };

    check_resolution_name(root, volume.dim())?;
    log::info!(
        "{}: assembled {:?} volume ({}-bit)",
        root.display(),
        volume.dim(),
        volume.bit_depth()
    );
    Ok(LoadedVolume {
        volume,
        spacing: spacing.unwrap_or_default(),
    })
}

fn assemble<T: Sample>(root: &Path, rows: Vec<Row>) -> Result<Array3<T>, IoError> {
    let mut row_blocks = Vec::with_capacity(rows.len());
    for (row_dir, columns) in rows {
        let mut column_blocks = Vec::with_capacity(columns.len());
        for (column_dir, tiles) in columns {
            let stacks = tiles
                .into_iter()
                .map(|(path, volume)| {
                    let found = volume.bit_depth();
                    T::unwrap_volume(volume).ok_or(IoError::MixedBitDepth {
                        path,
                        expected: T::BIT_DEPTH,
                        found,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            column_blocks.push(join(&column_dir, &stacks, Axis(0))?);
        }
        row_blocks.push(join(&row_dir, &column_blocks, Axis(2))?);
    }
    join(root, &row_blocks, Axis(1))
}

/// Concatenate `parts` along `axis`, reporting ragged extents against
/// `path`.
pub(crate) fn join<T: Sample>(
    path: &Path,
    parts: &[Array3<T>],
    axis: Axis,
) -> Result<Array3<T>, IoError> {
    let views: Vec<_> = parts.iter().map(Array3::view).collect();
    ndarray::concatenate(axis, &views).map_err(|_| IoError::InconsistentTiles {
        path: path.to_path_buf(),
        detail: format!(
            "extents {:?} do not line up along axis {}",
            parts.iter().map(Array3::dim).collect::<Vec<_>>(),
            axis.index()
        ),
    })
}

/// Sorted children of `dir` that are (or are not) directories.
fn entries(dir: &Path, directories: bool) -> Result<Vec<PathBuf>, IoError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() == directories {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

fn is_tiff(path: &Path) -> bool {
    let keep = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
    if !keep {
        log::debug!("skipping non-TIFF entry {}", path.display());
    }
    keep
}

/// Extents `(height, width, depth)` encoded in a `RES(HxWxD)` name.
fn parse_resolution_name(name: &str) -> Option<(usize, usize, usize)> {
    let inner = name.strip_prefix("RES(")?.strip_suffix(')')?;
    let mut parts = inner.split('x').map(str::parse::<usize>);
    let extents = (parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?);
    parts.next().is_none().then_some(extents)
}

fn check_resolution_name(root: &Path, (depth, height, width): (usize, usize, usize)) -> Result<(), IoError> {
    let Some(expected) = root
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_resolution_name)
    else {
        log::debug!("{} has no RES(HxWxD) name; extents not checked", root.display());
        return Ok(());
    };
    let found = (height, width, depth);
    if expected == found {
        Ok(())
    } else {
        Err(IoError::ShapeMismatch {
            path: root.to_path_buf(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_names_parse() {
        assert_eq!(parse_resolution_name("RES(6x8x4)"), Some((6, 8, 4)));
        assert_eq!(parse_resolution_name("RES(6x8)"), None);
        assert_eq!(parse_resolution_name("RES(6x8x4x2)"), None);
        assert_eq!(parse_resolution_name("res(6x8x4)"), None);
        assert_eq!(parse_resolution_name("RES(axbxc)"), None);
    }

    #[test]
    fn tiff_extensions_are_case_insensitive() {
        assert!(is_tiff(Path::new("a/000000.TIF")));
        assert!(is_tiff(Path::new("a/000000.tiff")));
        assert!(!is_tiff(Path::new("a/.DS_Store")));
        assert!(!is_tiff(Path::new("a/notes.txt")));
    }

    #[test]
    fn unnamed_root_skips_the_extent_check() {
        assert!(check_resolution_name(Path::new("/data/volume"), (1, 2, 3)).is_ok());
        assert!(matches!(
            check_resolution_name(Path::new("/data/RES(2x3x4)"), (1, 2, 3)),
            Err(IoError::ShapeMismatch {
                expected: (2, 3, 4),
                found: (2, 3, 1),
                ..
            })
        ));
    }
}
