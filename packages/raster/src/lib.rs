#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point sampling of GeoTIFF rasters.
//!
//! [`GeoRaster::open`] reads the image header and georeferencing once.
//! Pixel data is decoded lazily, one strip or tile at a time, and the last
//! decoded chunk is kept so consecutive nearby points do not decode it
//! again. Only band 1 is sampled.
//!
//! Georeferencing comes from `ModelPixelScale` + `ModelTiepoint`, or from
//! a north-up `ModelTransformation`. Pixels are treated as areas: a point
//! on the left/top edge of a pixel belongs to it, a point on the right or
//! bottom edge of the raster is outside.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

/// Errors from opening a raster. Sampling itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// The file could not be opened.
    #[error("Cannot open raster {}: {source}", path.display())]
    Io {
        /// Raster path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a readable TIFF.
    #[error("Cannot decode raster {}: {source}", path.display())]
    Tiff {
        /// Raster path.
        path: PathBuf,
        /// Underlying error.
        source: tiff::TiffError,
    },

    /// Neither pixel scale + tiepoint nor a transformation matrix is
    /// present.
    #[error("Raster {} has no georeferencing tags", path.display())]
    MissingGeoreference {
        /// Raster path.
        path: PathBuf,
    },

    /// Georeferencing exists but is rotated, flipped or degenerate.
    #[error("Unsupported georeferencing in {}: {reason}", path.display())]
    UnsupportedTransform {
        /// Raster path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// North-up affine transform: pixel `(col, row)` covers
/// `[origin_x + col * pixel_width, +pixel_width)` horizontally and
/// `(origin_y - (row + 1) * pixel_height, origin_y - row * pixel_height]`
/// vertically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X (longitude) of the top-left corner of pixel `(0, 0)`.
    pub origin_x: f64,
    /// Y (latitude) of the top-left corner of pixel `(0, 0)`.
    pub origin_y: f64,
    /// Pixel size along X. Positive.
    pub pixel_width: f64,
    /// Pixel size along Y. Positive, rows grow southwards.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Builds a transform from `ModelPixelScale` and `ModelTiepoint` values.
    fn from_scale_and_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Result<Self, String> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(format!(
                "expected 3 scale and 6 tiepoint values, got {} and {}",
                scale.len(),
                tiepoint.len()
            ));
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Self {
            origin_x: x - i * scale[0],
            origin_y: y + j * scale[1],
            pixel_width: scale[0],
            pixel_height: scale[1],
        }
        .validated()
    }

    /// Builds a transform from a 4x4 `ModelTransformation` matrix.
    fn from_matrix(m: &[f64]) -> Result<Self, String> {
        if m.len() < 16 {
            return Err(format!("expected 16 matrix values, got {}", m.len()));
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err("rotated rasters are not supported".to_string());
        }
        Self {
            origin_x: m[3],
            origin_y: m[7],
            pixel_width: m[0],
            pixel_height: -m[5],
        }
        .validated()
    }

    fn validated(self) -> Result<Self, String> {
        let finite = [
            self.origin_x,
            self.origin_y,
            self.pixel_width,
            self.pixel_height,
        ]
        .iter()
        .all(|v| v.is_finite());

        if !finite {
            return Err("non-finite georeferencing values".to_string());
        }
        if self.pixel_width <= 0.0 || self.pixel_height <= 0.0 {
            return Err(format!(
                "pixel size must be positive and north-up, got {} x {}",
                self.pixel_width, self.pixel_height
            ));
        }
        Ok(self)
    }

    /// Pixel containing `(x, y)`, if inside a `width` x `height` grid.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn pixel(&self, x: f64, y: f64, width: u32, height: u32) -> Option<(u32, u32)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let col = ((x - self.origin_x) / self.pixel_width).floor();
        let row = ((self.origin_y - y) / self.pixel_height).floor();

        if col < 0.0 || row < 0.0 || col >= f64::from(width) || row >= f64::from(height) {
            return None;
        }
        Some((col as u32, row as u32))
    }
}

/// How pixel data is split into independently decodable chunks.
#[derive(Debug, Clone, Copy)]
struct ChunkLayout {
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    /// Samples per pixel in a decoded chunk of band 1.
    samples: usize,
}

impl ChunkLayout {
    const fn chunks_across(&self) -> u32 {
        self.width.div_ceil(self.chunk_width)
    }

    /// Chunk index and the pixel's offset inside that chunk.
    const fn locate(&self, col: u32, row: u32) -> (u32, u32, u32) {
        let index = (row / self.chunk_height) * self.chunks_across() + col / self.chunk_width;
        (index, col % self.chunk_width, row % self.chunk_height)
    }

    /// Width and height of chunk `index` clipped to the image.
    fn clipped(&self, index: u32) -> (u32, u32) {
        let across = self.chunks_across();
        let x0 = (index % across) * self.chunk_width;
        let y0 = (index / across) * self.chunk_height;
        (
            self.chunk_width.min(self.width - x0),
            self.chunk_height.min(self.height - y0),
        )
    }
}

/// Storage type of the decoded samples, which decides how the no-data
/// sentinel is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    Integer,
    Float32,
    Float64,
}

impl SampleFormat {
    /// Float32 samples match when the sentinel rounds to the same `f32`;
    /// everything else needs exact equality.
    #[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
    fn is_nodata(self, value: f64, nodata: f64) -> bool {
        match self {
            Self::Float32 => value as f32 == nodata as f32,
            Self::Integer | Self::Float64 => value == nodata,
        }
    }
}

/// A decoded chunk of band 1.
struct Chunk {
    index: u32,
    values: Vec<f64>,
    format: SampleFormat,
    row_width: usize,
}

/// An open GeoTIFF that can be sampled at geographic coordinates.
///
/// The file handle is held until the value is dropped.
pub struct GeoRaster {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    transform: GeoTransform,
    layout: ChunkLayout,
    nodata: Option<f64>,
    cached: Option<Chunk>,
}

impl GeoRaster {
    /// Opens `path` and reads its dimensions, georeferencing, and no-data
    /// sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError`] if the file cannot be opened or decoded, or
    /// if it has no usable north-up georeferencing.
    pub fn open(path: &Path) -> Result<Self, RasterError> {
        let tiff_err = |source| RasterError::Tiff {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|source| RasterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;
        let (width, height) = decoder.dimensions().map_err(tiff_err)?;

        let transform = read_transform(&mut decoder, path)?;
        let layout = read_layout(&mut decoder, width, height).map_err(tiff_err)?;

        let nodata = decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok());

        log::info!(
            "Opened raster {} ({width}x{height}, {}x{} chunks, nodata={nodata:?})",
            path.display(),
            layout.chunk_width,
            layout.chunk_height,
        );

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            transform,
            layout,
            nodata,
            cached: None,
        })
    }

    /// Replaces the no-data sentinel read from the file.
    #[must_use]
    pub const fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.layout.width, self.layout.height)
    }

    #[must_use]
    pub const fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Band-1 value of the pixel containing `(lon, lat)`.
    ///
    /// Returns `None` outside the raster, for the no-data sentinel, for
    /// `NaN`, or if the chunk holding the pixel cannot be decoded.
    pub fn sample(&mut self, lon: f64, lat: f64) -> Option<f64> {
        let (col, row) = self
            .transform
            .pixel(lon, lat, self.layout.width, self.layout.height)?;
        let (index, x, y) = self.layout.locate(col, row);

        let chunk = match self.chunk(index) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!(
                    "Failed to decode chunk {index} of {} at ({lon}, {lat}): {e}",
                    self.path.display()
                );
                return None;
            }
        };

        let format = chunk.format;
        let value = *chunk
            .values
            .get(y as usize * chunk.row_width + x as usize)?;

        if value.is_nan() {
            return None;
        }
        if self
            .nodata
            .is_some_and(|nodata| format.is_nodata(value, nodata))
        {
            return None;
        }
        Some(value)
    }

    fn chunk(&mut self, index: u32) -> Result<&Chunk, String> {
        let hit = self.cached.as_ref().is_some_and(|c| c.index == index);
        if !hit {
            let decoded = self.decoder.read_chunk(index).map_err(|e| e.to_string())?;
            self.cached = Some(band_one(index, decoded, &self.layout)?);
        }
        self.cached
            .as_ref()
            .ok_or_else(|| "chunk cache is empty".to_string())
    }
}

fn read_transform(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> Result<GeoTransform, RasterError> {
    let unsupported = |reason| RasterError::UnsupportedTransform {
        path: path.to_path_buf(),
        reason,
    };

    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        return GeoTransform::from_scale_and_tiepoint(&scale, &tiepoint).map_err(unsupported);
    }

    if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        return GeoTransform::from_matrix(&matrix).map_err(unsupported);
    }

    Err(RasterError::MissingGeoreference {
        path: path.to_path_buf(),
    })
}

fn read_layout(
    decoder: &mut Decoder<BufReader<File>>,
    width: u32,
    height: u32,
) -> tiff::TiffResult<ChunkLayout> {
    let tile_width = decoder.find_tag_unsigned::<u32>(Tag::TileWidth)?;
    let tile_length = decoder.find_tag_unsigned::<u32>(Tag::TileLength)?;

    let (chunk_width, chunk_height) = match (tile_width, tile_length) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            let rows = decoder
                .find_tag_unsigned::<u32>(Tag::RowsPerStrip)?
                .unwrap_or(height);
            (width, rows.clamp(1, height.max(1)))
        }
    };

    let samples_per_pixel = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
        .unwrap_or(1)
        .max(1);
    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
        .unwrap_or(1);

    Ok(ChunkLayout {
        width,
        height,
        chunk_width,
        chunk_height,
        samples: if planar == 2 {
            1
        } else {
            usize::from(samples_per_pixel)
        },
    })
}

/// Extracts band 1 of a decoded chunk as `f64`.
///
/// Edge tiles may come back either padded to the full tile size or
/// clipped to the image; the buffer length tells which.
fn band_one(index: u32, decoded: DecodingResult, layout: &ChunkLayout) -> Result<Chunk, String> {
    let (values, format) = to_f64(decoded);
    let samples = layout.samples;

    let (clipped_w, clipped_h) = layout.clipped(index);
    let full = layout.chunk_width as usize * layout.chunk_height as usize * samples;
    let clipped = clipped_w as usize * clipped_h as usize * samples;

    let row_width = if values.len() >= full {
        layout.chunk_width as usize
    } else if values.len() >= clipped {
        clipped_w as usize
    } else {
        return Err(format!(
            "chunk {index} has {} samples, expected {clipped} or {full}",
            values.len()
        ));
    };

    Ok(Chunk {
        index,
        values: values.into_iter().step_by(samples).collect(),
        format,
        row_width,
    })
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(decoded: DecodingResult) -> (Vec<f64>, SampleFormat) {
    let values = match decoded {
        DecodingResult::F32(data) => {
            return (data.into_iter().map(f64::from).collect(), SampleFormat::Float32);
        }
        DecodingResult::F64(data) => return (data, SampleFormat::Float64),
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
    };
    (values, SampleFormat::Integer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{TiffEncoder, colortype};

    const NODATA: f32 = -9999.0;

    /// 4x3 float raster covering lon [-10, -6], lat [2, 5], one row per
    /// strip. Pixel `(col, row)` holds `row * 10 + col`, except `(3, 2)`
    /// which is no-data and `(0, 2)` which is `NaN`.
    fn write_grid(path: &Path, with_nodata_tag: bool) {
        let mut data: Vec<f32> = (0..3_u8)
            .flat_map(|row| (0..4_u8).map(move |col| f32::from(row * 10 + col)))
            .collect();
        data[2 * 4 + 3] = NODATA;
        data[2 * 4] = f32::NAN;

        let file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        let mut image = tiff.new_image::<colortype::Gray32Float>(4, 3).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[1.0_f64, 1.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(
                Tag::ModelTiepointTag,
                &[0.0_f64, 0.0, 0.0, -10.0, 5.0, 0.0][..],
            )
            .unwrap();
        if with_nodata_tag {
            image.encoder().write_tag(Tag::GdalNodata, "-9999").unwrap();
        }
        image.rows_per_strip(1).unwrap();
        image.write_data(&data).unwrap();
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn samples_pixel_containing_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        write_grid(&path, true);

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.dimensions(), (4, 3));
        assert_eq!(raster.nodata(), Some(-9999.0));

        assert_eq!(raster.sample(-9.5, 4.5), Some(0.0));
        assert_eq!(raster.sample(-8.5, 3.5), Some(11.0));
        assert_eq!(raster.sample(-6.01, 2.01), None);
        assert_eq!(raster.sample(-7.5, 2.5), Some(22.0));
        // Back to an earlier strip after decoding a later one.
        assert_eq!(raster.sample(-6.5, 4.9), Some(3.0));
    }

    #[test]
    fn outside_extent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        write_grid(&path, true);

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.sample(-10.5, 3.0), None);
        assert_eq!(raster.sample(-6.0, 3.0), None);
        assert_eq!(raster.sample(-8.0, 5.5), None);
        assert_eq!(raster.sample(-8.0, 1.9), None);
        assert_eq!(raster.sample(f64::NAN, 3.0), None);
    }

    #[test]
    fn nan_pixels_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        write_grid(&path, true);

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.sample(-9.5, 2.5), None);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn nodata_can_be_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        write_grid(&path, false);

        let raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.nodata(), None);

        let mut raster = raster.with_nodata(None);
        assert_eq!(raster.sample(-6.5, 2.5), Some(-9999.0));

        let mut raster = raster.with_nodata(Some(-9999.0));
        assert_eq!(raster.sample(-6.5, 2.5), None);

        let mut raster = raster.with_nodata(Some(11.0));
        assert_eq!(raster.sample(-8.5, 3.5), None);
    }

    fn write_single_pixel(path: &Path, value: f32, nodata: &str) {
        let file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        let mut image = tiff.new_image::<colortype::Gray32Float>(1, 1).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[1.0_f64, 1.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(
                Tag::ModelTiepointTag,
                &[0.0_f64, 0.0, 0.0, 0.0, 1.0, 0.0][..],
            )
            .unwrap();
        image.encoder().write_tag(Tag::GdalNodata, nodata).unwrap();
        image.write_data(&[value]).unwrap();
    }

    #[test]
    fn float32_nodata_matches_after_rounding_to_f32() {
        let dir = tempfile::tempdir().unwrap();

        for (name, nodata, value) in [
            ("decimal.tif", "-9999.9", -9999.9_f32),
            ("large.tif", "1e20", 1e20_f32),
        ] {
            let path = dir.path().join(name);
            write_single_pixel(&path, value, nodata);

            let mut raster = GeoRaster::open(&path).unwrap();
            assert!(raster.nodata().is_some());
            assert_eq!(raster.sample(0.5, 0.5), None, "{nodata}");
        }
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn float32_value_near_nodata_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("near.tif");
        write_single_pixel(&path, -9999.5, "-9999.9");

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.sample(0.5, 0.5), Some(-9999.5));
    }

    #[test]
    fn integer_nodata_needs_exact_match() {
        assert!(SampleFormat::Integer.is_nodata(-32768.0, -32768.0));
        assert!(!SampleFormat::Integer.is_nodata(-32767.0, -32768.0));
        assert!(!SampleFormat::Float64.is_nodata(f64::from(-9999.9_f32), -9999.9));
        assert!(SampleFormat::Float32.is_nodata(f64::from(-9999.9_f32), -9999.9));
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn samples_first_band_of_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tif");

        let data: Vec<u8> = vec![10, 20, 30, 40, 50, 60];
        let file = File::create(&path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        let mut image = tiff.new_image::<colortype::RGB8>(2, 1).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[0.5_f64, 0.5, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &[0.0_f64, 0.0, 0.0, 100.0, -20.0, 0.0][..])
            .unwrap();
        image.write_data(&data).unwrap();

        let mut raster = GeoRaster::open(&path).unwrap();
        assert_eq!(raster.sample(100.25, -20.25), Some(10.0));
        assert_eq!(raster.sample(100.75, -20.25), Some(40.0));
    }

    #[test]
    fn missing_georeference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tif");

        let file = File::create(&path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        tiff.write_image::<colortype::Gray8>(2, 2, &[1, 2, 3, 4])
            .unwrap();

        assert!(matches!(
            GeoRaster::open(&path),
            Err(RasterError::MissingGeoreference { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GeoRaster::open(&dir.path().join("nope.tif")),
            Err(RasterError::Io { .. })
        ));
    }

    #[test]
    fn transform_from_matrix() {
        let m = [
            0.5, 0.0, 0.0, -180.0, //
            0.0, -0.5, 0.0, 90.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let t = GeoTransform::from_matrix(&m).unwrap();
        assert_eq!(t.pixel(-179.9, 89.9, 720, 360), Some((0, 0)));
        assert_eq!(t.pixel(179.9, -89.9, 720, 360), Some((719, 359)));

        let mut rotated = m;
        rotated[1] = 0.1;
        assert!(GeoTransform::from_matrix(&rotated).is_err());
    }

    #[test]
    fn tiepoint_offset_is_applied() {
        let t = GeoTransform::from_scale_and_tiepoint(
            &[1.0, 1.0, 0.0],
            &[2.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        )
        .unwrap();
        assert!((t.origin_x - -2.0).abs() < f64::EPSILON);
        assert!((t.origin_y - 1.0).abs() < f64::EPSILON);
    }
}
