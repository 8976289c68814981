//! Multi-page grayscale TIFF stacks: one page per z slice.
//!
//! Pages carry X/Y resolution tags derived from the voxel spacing, and
//! the first page an ImageJ-style description with the slice count and
//! z spacing, so Fiji opens the stack with the right calibration.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView3, Axis};
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::{TiffError, TiffResult};

use crate::error::IoError;
use crate::volume::{LoadedVolume, Sample, Spacing, Volume};

/// Denominator used when encoding resolutions as rationals.
const RESOLUTION_DENOMINATOR: u32 = 1_000_000;

/// Read every page of a grayscale TIFF into a volume.
///
/// X/Y spacing comes from the resolution tags when present, z spacing
/// from an ImageJ description; missing values default to `1.0`.
///
/// # Errors
///
/// Returns [`IoError::Io`] or [`IoError::Tiff`] when the file cannot be
/// read, [`IoError::UnsupportedSampleFormat`] for anything but 8 or 16
/// bit grayscale, [`IoError::MixedBitDepth`] if pages disagree on bit
/// depth and [`IoError::InconsistentTiles`] if they disagree on extents.
pub fn read_stack(path: &Path) -> Result<LoadedVolume, IoError> {
    let file = File::open(path).map_err(|e| IoError::io(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| IoError::tiff(path, e))?
        .with_limits(Limits::unlimited());

    let spacing = read_spacing(&mut decoder).map_err(|e| IoError::tiff(path, e))?;

    let mut pages = Vec::new();
    loop {
        pages.push(read_page(&mut decoder, path)?);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| IoError::tiff(path, e))?;
    }
    log::debug!("{}: read {} pages", path.display(), pages.len());

    let volume = match pages.first() {
        Some(Volume::U16(_)) => Volume::U16(join_pages::<u16>(path, pages)?),
        _ => Volume::U8(join_pages::<u8>(path, pages)?),
    };
    Ok(LoadedVolume { volume, spacing })
}

fn read_page<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<Volume, IoError> {
    let color = decoder.colortype().map_err(|e| IoError::tiff(path, e))?;
    if !matches!(color, tiff::ColorType::Gray(8 | 16)) {
        return Err(IoError::UnsupportedSampleFormat {
            path: path.to_path_buf(),
            format: format!("{color:?}"),
        });
    }
    let (width, height) = decoder.dimensions().map_err(|e| IoError::tiff(path, e))?;
    let shape = (height as usize, width as usize);
    let malformed = |_| IoError::InconsistentTiles {
        path: path.to_path_buf(),
        detail: format!("page data does not fill {width}x{height}"),
    };
    match decoder.read_image().map_err(|e| IoError::tiff(path, e))? {
        DecodingResult::U8(data) => Ok(Volume::U8(
            Array2::from_shape_vec(shape, data)
                .map_err(malformed)?
                .insert_axis(Axis(0)),
        )),
        DecodingResult::U16(data) => Ok(Volume::U16(
            Array2::from_shape_vec(shape, data)
                .map_err(malformed)?
                .insert_axis(Axis(0)),
        )),
        _ => Err(IoError::UnsupportedSampleFormat {
            path: path.to_path_buf(),
            format: format!("{color:?}"),
        }),
    }
}

fn join_pages<T: Sample>(path: &Path, pages: Vec<Volume>) -> Result<Array3<T>, IoError> {
    let pages = pages
        .into_iter()
        .map(|page| {
            let found = page.bit_depth();
            T::unwrap_volume(page).ok_or_else(|| IoError::MixedBitDepth {
                path: path.to_path_buf(),
                expected: T::BIT_DEPTH,
                found,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    crate::loader::join(path, &pages, Axis(0))
}

fn read_spacing<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Spacing> {
    let mut spacing = Spacing::default();
    if let Some(x) = decoder.find_tag(Tag::XResolution)?.and_then(inverse_rational) {
        spacing.x = x;
    }
    if let Some(y) = decoder.find_tag(Tag::YResolution)?.and_then(inverse_rational) {
        spacing.y = y;
    }
    if let Some(Value::Ascii(description)) = decoder.find_tag(Tag::ImageDescription)?
        && let Some(z) = imagej_spacing(&description)
    {
        spacing.z = z;
    }
    Ok(spacing)
}

/// `1 / resolution` for a positive rational resolution tag.
fn inverse_rational(value: Value) -> Option<f64> {
    match value {
        Value::Rational(n, d) if n > 0 && d > 0 => Some(f64::from(d) / f64::from(n)),
        _ => None,
    }
}

/// The `spacing=` entry of an ImageJ description.
fn imagej_spacing(description: &str) -> Option<f64> {
    description
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "spacing")
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|v: &f64| v.is_finite() && *v > 0.0)
}

fn imagej_description(slices: usize, z_spacing: f64) -> String {
    format!(
        "ImageJ=1.11a\nimages={slices}\nslices={slices}\nunit=micron\nspacing={z_spacing}\nloop=false\n"
    )
}

/// Encode a resolution in pixels per unit.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_rational(resolution: f64) -> Rational {
    let scaled = (resolution * f64::from(RESOLUTION_DENOMINATOR)).round();
    if scaled >= 1.0 && scaled <= f64::from(u32::MAX) {
        Rational {
            n: scaled as u32,
            d: RESOLUTION_DENOMINATOR,
        }
    } else {
        Rational {
            n: resolution.round().clamp(1.0, f64::from(u32::MAX)) as u32,
            d: 1,
        }
    }
}

/// Write `volume` as a multi-page TIFF, one page per slice.
///
/// # Errors
///
/// Returns [`IoError::Io`] if the file cannot be created and
/// [`IoError::Tiff`] if encoding fails.
pub fn write_stack(path: &Path, volume: &Volume, spacing: Spacing) -> Result<(), IoError> {
    let file = File::create(path).map_err(|e| IoError::io(path, e))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(|e| IoError::tiff(path, e))?;
    match volume {
        Volume::U8(a) => write_pages::<colortype::Gray8, _>(&mut encoder, a.view(), spacing),
        Volume::U16(a) => write_pages::<colortype::Gray16, _>(&mut encoder, a.view(), spacing),
    }
    .map_err(|e| IoError::tiff(path, e))?;
    log::debug!("{}: wrote {} pages", path.display(), volume.dim().0);
    Ok(())
}

fn write_pages<C, W>(
    encoder: &mut TiffEncoder<W>,
    volume: ArrayView3<'_, C::Inner>,
    spacing: Spacing,
) -> TiffResult<()>
where
    C: ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let (depth, height, width) = volume.dim();
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(TiffError::LimitsExceeded);
    };
    let description = imagej_description(depth, spacing.z);

    for (z, page) in volume.outer_iter().enumerate() {
        let mut image = encoder.new_image::<C>(width, height)?;
        image.resolution_unit(ResolutionUnit::None);
        image.x_resolution(to_rational(1.0 / spacing.x));
        image.y_resolution(to_rational(1.0 / spacing.y));
        if z == 0 {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description.as_str())?;
        }
        let data: Vec<C::Inner> = page.iter().copied().collect();
        image.write_data(&data)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn description_round_trips_z_spacing() {
        let description = imagej_description(12, 2.5);
        assert!(description.contains("slices=12"));
        assert_eq!(imagej_spacing(&description), Some(2.5));
    }

    #[test]
    fn description_without_spacing_is_ignored() {
        assert_eq!(imagej_spacing("ImageJ=1.11a\nslices=3\n"), None);
        assert_eq!(imagej_spacing("spacing=-1\n"), None);
    }

    #[test]
    fn rational_inverts_to_spacing() {
        let r = to_rational(1.0 / 0.25);
        assert_eq!(inverse_rational(Value::Rational(r.n, r.d)), Some(0.25));
    }

    #[test]
    fn tiny_resolution_falls_back_to_whole_units() {
        let r = to_rational(1e-9);
        assert_eq!((r.n, r.d), (1, 1));
    }

    #[test]
    fn stack_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let volume = Volume::U16(Array3::from_shape_fn((3, 5, 7), |(z, y, x)| {
            u16::try_from(z * 1000 + y * 10 + x).unwrap()
        }));
        let spacing = Spacing {
            x: 0.5,
            y: 0.25,
            z: 2.0,
        };
        write_stack(&path, &volume, spacing).unwrap();
        let loaded = read_stack(&path).unwrap();
        assert_eq!(loaded.volume, volume);
        assert_eq!(loaded.spacing, spacing);
    }
}
