use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, ImageReader};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::{PlanarConfiguration, Tag};

use crate::volume::{Volume, VolumeData};

const TIFF_LE_MAGIC: [u8; 4] = *b"II*\0";
const TIFF_BE_MAGIC: [u8; 4] = *b"MM\0*";
const BIGTIFF_LE_MAGIC: [u8; 4] = *b"II+\0";
const BIGTIFF_BE_MAGIC: [u8; 4] = *b"MM\0+";

/// Decodes a raster keeping its native sample type and channel count.
///
/// TIFF files (sniffed by magic bytes) go through the `tiff` decoder so that
/// 16/32-bit integer and float samples survive untouched; anything else is
/// handed to `image` and mapped from its `DynamicImage` variant.
pub fn decode_raster(path: &Path) -> Result<Volume> {
    if is_tiff(path)? {
        let file = File::open(path)
            .with_context(|| format!("Failed to open TIFF {}", path.display()))?;
        decode_tiff(BufReader::new(file))
            .with_context(|| format!("Failed to decode TIFF {}", path.display()))
    } else {
        let image = ImageReader::open(path)
            .with_context(|| format!("Failed to open raster {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("Failed to detect format of {}", path.display()))?
            .decode()
            .with_context(|| format!("Failed to decode raster {}", path.display()))?;
        from_dynamic(image).with_context(|| format!("Unsupported raster {}", path.display()))
    }
}

fn is_tiff(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open raster {}", path.display()))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(matches!(
            magic,
            TIFF_LE_MAGIC | TIFF_BE_MAGIC | BIGTIFF_LE_MAGIC | BIGTIFF_BE_MAGIC
        )),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read raster header {}", path.display()))
        }
    }
}

fn decode_tiff<R: Read + Seek>(reader: R) -> Result<Volume> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let samples_per_pixel = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
        .unwrap_or(1) as usize;
    if samples_per_pixel == 0 {
        bail!("Samples per pixel tag was zero");
    }
    let planar = decoder.find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?;
    if samples_per_pixel > 1 && planar == Some(PlanarConfiguration::Planar.to_u16()) {
        bail!("Planar TIFFs (one plane per sample) are not supported; store samples interleaved");
    }

    let data = match decoder.read_image()? {
        DecodingResult::U8(buf) => VolumeData::U8(buf),
        DecodingResult::U16(buf) => VolumeData::U16(buf),
        DecodingResult::U32(buf) => VolumeData::U32(buf),
        DecodingResult::U64(buf) => VolumeData::U64(buf),
        DecodingResult::I8(buf) => VolumeData::I8(buf),
        DecodingResult::I16(buf) => VolumeData::I16(buf),
        DecodingResult::I32(buf) => VolumeData::I32(buf),
        DecodingResult::I64(buf) => VolumeData::I64(buf),
        DecodingResult::F32(buf) => VolumeData::F32(buf),
        DecodingResult::F64(buf) => VolumeData::F64(buf),
    };

    Volume::new(
        pixel_shape(height as usize, width as usize, samples_per_pixel),
        data,
    )
}

fn from_dynamic(image: DynamicImage) -> Result<Volume> {
    let height = image.height() as usize;
    let width = image.width() as usize;
    let (channels, data) = match image {
        DynamicImage::ImageLuma8(buf) => (1, VolumeData::U8(buf.into_raw())),
        DynamicImage::ImageLumaA8(buf) => (2, VolumeData::U8(buf.into_raw())),
        DynamicImage::ImageRgb8(buf) => (3, VolumeData::U8(buf.into_raw())),
        DynamicImage::ImageRgba8(buf) => (4, VolumeData::U8(buf.into_raw())),
        DynamicImage::ImageLuma16(buf) => (1, VolumeData::U16(buf.into_raw())),
        DynamicImage::ImageLumaA16(buf) => (2, VolumeData::U16(buf.into_raw())),
        DynamicImage::ImageRgb16(buf) => (3, VolumeData::U16(buf.into_raw())),
        DynamicImage::ImageRgba16(buf) => (4, VolumeData::U16(buf.into_raw())),
        DynamicImage::ImageRgb32F(buf) => (3, VolumeData::F32(buf.into_raw())),
        DynamicImage::ImageRgba32F(buf) => (4, VolumeData::F32(buf.into_raw())),
        other => {
            return Err(anyhow!("Unsupported pixel layout {:?}", other.color()));
        }
    };
    Volume::new(pixel_shape(height, width, channels), data)
}

fn pixel_shape(height: usize, width: usize, channels: usize) -> Vec<usize> {
    if channels == 1 {
        vec![height, width]
    } else {
        vec![height, width, channels]
    }
}
