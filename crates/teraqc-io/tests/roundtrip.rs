//! Tile hierarchies written to a temp directory reassemble to the
//! volume they were cut from.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array3, s};
use teraqc_io::{IoError, Spacing, Volume, load_resolution_dir, load_volume, write_stack};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn source_volume() -> Array3<u16> {
    Array3::from_shape_fn((4, 6, 8), |(z, y, x)| {
        u16::try_from(z * 1000 + y * 20 + x).unwrap()
    })
}

fn spacing() -> Spacing {
    Spacing {
        x: 0.5,
        y: 0.5,
        z: 3.0,
    }
}

/// Cut `volume` into a 2 x 2 grid of columns with two z tiles each.
fn write_hierarchy(root: &Path, volume: &Array3<u16>) {
    let (depth, height, width) = volume.dim();
    let (half_z, half_y, half_x) = (depth / 2, height / 2, width / 2);
    for (y0, y1) in [(0, half_y), (half_y, height)] {
        let row = root.join(format!("{:06}", y0 * 10));
        for (x0, x1) in [(0, half_x), (half_x, width)] {
            let column = row.join(format!("{:06}_{:06}", y0 * 10, x0 * 10));
            fs::create_dir_all(&column).unwrap();
            for (z0, z1) in [(0, half_z), (half_z, depth)] {
                let tile = volume.slice(s![z0..z1, y0..y1, x0..x1]).to_owned();
                let path = column.join(format!("{:06}_{:06}_{:06}.tif", y0 * 10, x0 * 10, z0 * 10));
                write_stack(&path, &Volume::U16(tile), spacing()).unwrap();
            }
        }
    }
}

fn first_tile(root: &Path) -> PathBuf {
    root.join("000000/000000_000000/000000_000000_000000.tif")
}

#[test]
fn tiles_reassemble_to_the_source_volume() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("RES(6x8x4)");
    let volume = source_volume();
    write_hierarchy(&root, &volume);
    fs::write(root.join("000000/000000_000000/notes.txt"), "ignored").unwrap();

    let loaded = load_resolution_dir(&root).unwrap();
    assert_eq!(loaded.volume, Volume::U16(volume));
    assert_eq!(
        loaded.spacing,
        Spacing {
            z: 1.0,
            ..spacing()
        }
    );
}

#[test]
fn load_volume_dispatches_on_path_kind() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tiles");
    let volume = source_volume();
    write_hierarchy(&root, &volume);

    let from_dir = load_volume(&root).unwrap();
    assert_eq!(from_dir.volume.dim(), (4, 6, 8));

    let from_file = load_volume(&first_tile(&root)).unwrap();
    assert_eq!(from_file.volume.dim(), (2, 3, 4));
    assert_eq!(from_file.spacing, spacing());
}

#[test]
fn ragged_tiles_are_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("RES(6x8x4)");
    write_hierarchy(&root, &source_volume());
    // One z tile in the first column is a pixel narrower than its neighbor.
    let narrow = Array3::<u16>::zeros((2, 3, 3));
    write_stack(&first_tile(&root), &Volume::U16(narrow), spacing()).unwrap();

    let err = load_resolution_dir(&root).unwrap_err();
    assert!(
        matches!(err, IoError::InconsistentTiles { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn resolution_name_must_match_assembled_extents() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("RES(6x8x5)");
    write_hierarchy(&root, &source_volume());

    let err = load_resolution_dir(&root).unwrap_err();
    assert!(matches!(
        err,
        IoError::ShapeMismatch {
            expected: (6, 8, 5),
            found: (6, 8, 4),
            ..
        }
    ));
}

#[test]
fn mixed_bit_depths_are_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("RES(6x8x4)");
    write_hierarchy(&root, &source_volume());
    let bytes = Array3::<u8>::zeros((2, 3, 4));
    let last = root.join("000030/000030_000040/000030_000040_000020.tif");
    write_stack(&last, &Volume::U8(bytes), spacing()).unwrap();

    let err = load_resolution_dir(&root).unwrap_err();
    assert!(matches!(
        err,
        IoError::MixedBitDepth {
            expected: 16,
            found: 8,
            ..
        }
    ));
}

#[test]
fn empty_folders_are_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("RES(1x1x1)");
    fs::create_dir_all(root.join("000000/000000_000000")).unwrap();

    assert!(matches!(
        load_resolution_dir(&root),
        Err(IoError::EmptyDirectory(path)) if path.ends_with("000000_000000")
    ));
    assert!(matches!(
        load_resolution_dir(dir.path().join("RES(1x1x1)/000000/000000_000000").as_path()),
        Err(IoError::EmptyDirectory(_))
    ));
}

#[test]
fn missing_path_is_an_io_error() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_volume(&dir.path().join("absent.tif")),
        Err(IoError::Io { .. })
    ));
}
