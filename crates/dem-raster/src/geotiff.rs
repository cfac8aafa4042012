//! In-memory raster model and GeoTIFF read/write.
//!
//! Georeferencing is carried in the standard GeoTIFF tags:
//! - ModelPixelScale (33550): `[res_x, res_y, 0]`
//! - ModelTiepoint (33922): `[0, 0, 0, west, north, 0]`
//! - GeoKeyDirectory (34735): geographic model, pixel-is-area, EPSG code
//! - GDAL_NODATA (42113): no-data value as ASCII

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use dem_common::CrsCode;
use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType as EncoderColorType};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{RasterError, Result};
use crate::transform::GeoTransform;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEO_KEY_MODEL_TYPE: u16 = 1024;
const GEO_KEY_RASTER_TYPE: u16 = 1025;
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Pixel datatype of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    U16,
    I16,
    I32,
    F32,
    F64,
}

impl SampleType {
    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }
}

/// Numeric sample that can be compared against a no-data value.
pub trait Sample: Copy + PartialEq + Send + Sync + 'static {
    const TYPE: SampleType;

    fn to_f64(self) -> f64;

    /// Saturating conversion, as with `as`.
    fn from_f64(value: f64) -> Self;

    /// True when the sample equals `nodata` (NaN matches NaN) or is NaN itself.
    fn is_nodata(self, nodata: Option<f64>) -> bool {
        let v = self.to_f64();
        if v.is_nan() {
            return true;
        }
        match nodata {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => v == nd,
            None => false,
        }
    }
}

macro_rules! impl_sample {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl Sample for $t {
                const TYPE: SampleType = SampleType::$variant;

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_sample!(u8 => U8, u16 => U16, i16 => I16, i32 => I32, f32 => F32, f64 => F64);

/// Interleaved pixel samples (band-interleaved-by-pixel, row-major).
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the typed vector inside a [`SampleBuffer`].
#[macro_export]
macro_rules! with_samples {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            $crate::geotiff::SampleBuffer::U8($v) => $body,
            $crate::geotiff::SampleBuffer::U16($v) => $body,
            $crate::geotiff::SampleBuffer::I16($v) => $body,
            $crate::geotiff::SampleBuffer::I32($v) => $body,
            $crate::geotiff::SampleBuffer::F32($v) => $body,
            $crate::geotiff::SampleBuffer::F64($v) => $body,
        }
    };
}

impl SampleBuffer {
    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleBuffer::U8(_) => SampleType::U8,
            SampleBuffer::U16(_) => SampleType::U16,
            SampleBuffer::I16(_) => SampleType::I16,
            SampleBuffer::I32(_) => SampleType::I32,
            SampleBuffer::F32(_) => SampleType::F32,
            SampleBuffer::F64(_) => SampleType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A buffer of `len` samples of `sample_type`, all set to `fill`.
    pub fn filled(sample_type: SampleType, len: usize, fill: f64) -> Self {
        match sample_type {
            SampleType::U8 => SampleBuffer::U8(vec![u8::from_f64(fill); len]),
            SampleType::U16 => SampleBuffer::U16(vec![u16::from_f64(fill); len]),
            SampleType::I16 => SampleBuffer::I16(vec![i16::from_f64(fill); len]),
            SampleType::I32 => SampleBuffer::I32(vec![i32::from_f64(fill); len]),
            SampleType::F32 => SampleBuffer::F32(vec![f32::from_f64(fill); len]),
            SampleType::F64 => SampleBuffer::F64(vec![fill; len]),
        }
    }

    /// Sample at flat index as `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_samples!(self, v => v.get(index).map(|s| s.to_f64()))
    }

    fn from_decoded(result: DecodingResult) -> Result<Self> {
        match result {
            DecodingResult::U8(v) => Ok(SampleBuffer::U8(v)),
            DecodingResult::U16(v) => Ok(SampleBuffer::U16(v)),
            DecodingResult::I16(v) => Ok(SampleBuffer::I16(v)),
            DecodingResult::I32(v) => Ok(SampleBuffer::I32(v)),
            DecodingResult::F32(v) => Ok(SampleBuffer::F32(v)),
            DecodingResult::F64(v) => Ok(SampleBuffer::F64(v)),
            DecodingResult::U32(_) => Err(RasterError::unsupported("u32 samples")),
            DecodingResult::U64(_) => Err(RasterError::unsupported("u64 samples")),
            _ => Err(RasterError::unsupported("signed 8/64-bit samples")),
        }
    }
}

/// Everything about a raster except its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub sample_type: SampleType,
    pub transform: Option<GeoTransform>,
    pub crs: Option<CrsCode>,
    pub nodata: Option<f64>,
}

impl RasterInfo {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A fully decoded raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub info: RasterInfo,
    pub samples: SampleBuffer,
}

impl Raster {
    /// Wrap a sample buffer, checking it matches `width * height * bands`.
    pub fn new(width: u32, height: u32, bands: u16, samples: SampleBuffer) -> Result<Self> {
        let expected = width as usize * height as usize * bands as usize;
        if samples.len() != expected {
            return Err(RasterError::BufferSize {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            info: RasterInfo {
                width,
                height,
                bands,
                sample_type: samples.sample_type(),
                transform: None,
                crs: None,
                nodata: None,
            },
            samples,
        })
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.info.transform = Some(transform);
        self
    }

    pub fn with_crs(mut self, crs: CrsCode) -> Self {
        self.info.crs = Some(crs);
        self
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.info.nodata = Some(nodata);
        self
    }

    /// Sample value of `band` at `(col, row)`.
    pub fn value_at(&self, col: u32, row: u32, band: u16) -> Option<f64> {
        if col >= self.info.width || row >= self.info.height || band >= self.info.bands {
            return None;
        }
        let idx = (row as usize * self.info.width as usize + col as usize) * self.info.bands as usize
            + band as usize;
        self.samples.get_f64(idx)
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))?;

    // A 4000x4000 f64 chunk is already past the decoder's default limits
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024;
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 64 * 1024 * 1024;
    Ok(decoder.with_limits(limits))
}

fn bands_for(color: ColorType) -> Result<u16> {
    match color {
        ColorType::Gray(_) => Ok(1),
        ColorType::GrayA(_) => Ok(2),
        ColorType::RGB(_) => Ok(3),
        ColorType::RGBA(_) => Ok(4),
        other => Err(RasterError::unsupported(format!("color type {:?}", other))),
    }
}

/// Tag for a GeoTIFF code, as the decoder names it.
fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(geo_tag(TAG_MODEL_TIEPOINT)).ok()?;
    let scale = decoder.get_tag_f64_vec(geo_tag(TAG_MODEL_PIXEL_SCALE)).ok()?;
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }

    // Tiepoint is [i, j, k, x, y, z]: raster (i, j) maps to world (x, y)
    let west = tiepoint[3] - tiepoint[0] * scale[0];
    let north = tiepoint[4] + tiepoint[1] * scale[1];
    GeoTransform::from_origin(west, north, scale[0], scale[1]).ok()
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CrsCode> {
    let keys = decoder.get_tag_u16_vec(geo_tag(TAG_GEO_KEY_DIRECTORY)).ok()?;
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == GEO_KEY_GEOGRAPHIC_TYPE && entry[1] == 0)
        .and_then(|entry| CrsCode::from_epsg(entry[3]))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(geo_tag(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
}

fn read_metadata<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    sample_type: SampleType,
) -> Result<RasterInfo> {
    let (width, height) = decoder.dimensions()?;
    let bands = bands_for(decoder.colortype()?)?;
    Ok(RasterInfo {
        width,
        height,
        bands,
        sample_type,
        transform: read_transform(decoder),
        crs: read_crs(decoder),
        nodata: read_nodata(decoder),
    })
}

/// Decode a whole TIFF/GeoTIFF into memory.
pub fn read_geotiff(path: &Path) -> Result<Raster> {
    let mut decoder = open_decoder(path)?;
    let samples = SampleBuffer::from_decoded(decoder.read_image()?)?;
    let info = read_metadata(&mut decoder, samples.sample_type())?;

    let expected = info.pixel_count() * info.bands as usize;
    if samples.len() != expected {
        return Err(RasterError::BufferSize {
            expected,
            actual: samples.len(),
        });
    }
    Ok(Raster { info, samples })
}

/// Read the header and decode only the first strip or tile.
///
/// Cheaper than [`read_geotiff`] and still proves the pixel data is readable.
pub fn probe_geotiff(path: &Path) -> Result<RasterInfo> {
    let mut decoder = open_decoder(path)?;
    let first = SampleBuffer::from_decoded(decoder.read_chunk(0)?)?;
    if first.is_empty() {
        return Err(RasterError::unsupported("first chunk decoded to zero samples"));
    }
    read_metadata(&mut decoder, first.sample_type())
}

fn write_geo_tags<W: Write + Seek>(
    dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
    info: &RasterInfo,
) -> Result<()> {
    if let Some(t) = info.transform {
        let scale = [t.res_x(), t.res_y(), 0.0];
        let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
        dir.write_tag(geo_tag(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
        dir.write_tag(geo_tag(TAG_MODEL_TIEPOINT), &tiepoint[..])?;

        let epsg = info.crs.unwrap_or_default().epsg();
        let keys: [u16; 16] = [
            1, 1, 0, 3,
            GEO_KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC,
            GEO_KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
            GEO_KEY_GEOGRAPHIC_TYPE, 0, 1, epsg,
        ];
        dir.write_tag(geo_tag(TAG_GEO_KEY_DIRECTORY), &keys[..])?;
    }

    if let Some(nodata) = info.nodata {
        let text = nodata.to_string();
        dir.write_tag(geo_tag(TAG_GDAL_NODATA), text.as_str())?;
    }
    Ok(())
}

fn encode<C, W>(encoder: &mut TiffEncoder<W>, info: &RasterInfo, data: &[C::Inner]) -> Result<()>
where
    C: EncoderColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut image = encoder.new_image::<C>(info.width, info.height)?;
    write_geo_tags(image.encoder(), info)?;
    image.write_data(data)?;
    Ok(())
}

/// Write a raster, with GeoTIFF tags when it carries a transform.
pub fn write_geotiff(path: &Path, raster: &Raster) -> Result<()> {
    let info = &raster.info;
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;

    match (&raster.samples, info.bands) {
        (SampleBuffer::U8(v), 1) => encode::<colortype::Gray8, _>(&mut encoder, info, v),
        (SampleBuffer::U8(v), 3) => encode::<colortype::RGB8, _>(&mut encoder, info, v),
        (SampleBuffer::U8(v), 4) => encode::<colortype::RGBA8, _>(&mut encoder, info, v),
        (SampleBuffer::U16(v), 1) => encode::<colortype::Gray16, _>(&mut encoder, info, v),
        (SampleBuffer::I16(v), 1) => encode::<colortype::GrayI16, _>(&mut encoder, info, v),
        (SampleBuffer::I32(v), 1) => encode::<colortype::GrayI32, _>(&mut encoder, info, v),
        (SampleBuffer::F32(v), 1) => encode::<colortype::Gray32Float, _>(&mut encoder, info, v),
        (SampleBuffer::F64(v), 1) => encode::<colortype::Gray64Float, _>(&mut encoder, info, v),
        (samples, bands) => Err(RasterError::unsupported(format!(
            "{:?} with {} bands",
            samples.sample_type(),
            bands
        ))),
    }
}
