use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::volume::{Volume, VolumeData};

const MAGIC_PREFIX: &str = "NRRD000";
const WRITE_MAGIC: &str = "NRRD0005";
const GZIP_LEVEL: u32 = 9;

/// Payload encoding of an attached-data NRRD file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Gzip,
    Raw,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Raw => "raw",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Encoding::Gzip),
            "raw" => Ok(Encoding::Raw),
            other => bail!("Unsupported NRRD encoding '{other}' (expected gzip or raw)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl SampleType {
    fn of(data: &VolumeData) -> Self {
        match data {
            VolumeData::U8(_) => SampleType::U8,
            VolumeData::I8(_) => SampleType::I8,
            VolumeData::U16(_) => SampleType::U16,
            VolumeData::I16(_) => SampleType::I16,
            VolumeData::U32(_) => SampleType::U32,
            VolumeData::I32(_) => SampleType::I32,
            VolumeData::U64(_) => SampleType::U64,
            VolumeData::I64(_) => SampleType::I64,
            VolumeData::F32(_) => SampleType::F32,
            VolumeData::F64(_) => SampleType::F64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SampleType::U8 => "uint8",
            SampleType::I8 => "int8",
            SampleType::U16 => "uint16",
            SampleType::I16 => "int16",
            SampleType::U32 => "uint32",
            SampleType::I32 => "int32",
            SampleType::U64 => "uint64",
            SampleType::I64 => "int64",
            SampleType::F32 => "float",
            SampleType::F64 => "double",
        }
    }

    fn width(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }

    fn parse(value: &str) -> Result<Self> {
        let ty = match value.trim() {
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => SampleType::U8,
            "signed char" | "int8" | "int8_t" => SampleType::I8,
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                SampleType::U16
            }
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                SampleType::I16
            }
            "uint" | "unsigned int" | "uint32" | "uint32_t" => SampleType::U32,
            "int" | "signed int" | "int32" | "int32_t" => SampleType::I32,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64"
            | "uint64_t" => SampleType::U64,
            "longlong" | "long long" | "long long int" | "signed long long"
            | "signed long long int" | "int64" | "int64_t" => SampleType::I64,
            "float" => SampleType::F32,
            "double" => SampleType::F64,
            other => bail!("Unsupported NRRD type '{other}'"),
        };
        Ok(ty)
    }
}

trait Sample: Copy + Default {
    const WIDTH: usize;
    fn put_le(self, out: &mut Vec<u8>);
    fn read(bytes: &[u8], big_endian: bool) -> Self;
}

macro_rules! impl_sample {
    ($($ty:ty),*) => {
        $(
            impl Sample for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn put_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read(bytes: &[u8], big_endian: bool) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    if big_endian {
                        <$ty>::from_be_bytes(raw)
                    } else {
                        <$ty>::from_le_bytes(raw)
                    }
                }
            }
        )*
    };
}

impl_sample!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

pub fn write_nrrd(path: &Path, volume: &Volume, encoding: Encoding) -> Result<()> {
    let bytes = encode_nrrd(volume, encoding)?;
    fs::write(path, bytes).with_context(|| format!("Failed to write NRRD {}", path.display()))
}

pub fn read_nrrd(path: &Path) -> Result<Volume> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read NRRD {}", path.display()))?;
    decode_nrrd(&bytes).with_context(|| format!("Failed to decode NRRD {}", path.display()))
}

/// Serializes a volume with `sizes` in array index order and the first index
/// varying fastest in the payload.
pub fn encode_nrrd(volume: &Volume, encoding: Encoding) -> Result<Vec<u8>> {
    let sample_type = SampleType::of(volume.data());
    let sizes = volume
        .shape()
        .iter()
        .map(|dim| dim.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    let mut out = Vec::new();
    writeln!(out, "{WRITE_MAGIC}")?;
    writeln!(out, "# Written by {}", env!("CARGO_PKG_NAME"))?;
    writeln!(out, "type: {}", sample_type.name())?;
    writeln!(out, "dimension: {}", volume.ndim())?;
    writeln!(out, "sizes: {sizes}")?;
    writeln!(out, "endian: little")?;
    writeln!(out, "encoding: {encoding}")?;
    writeln!(out)?;

    let payload = payload_bytes(volume);
    match encoding {
        Encoding::Raw => out.extend_from_slice(&payload),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(out, Compression::new(GZIP_LEVEL));
            encoder.write_all(&payload)?;
            out = encoder.finish().context("Failed to gzip NRRD payload")?;
        }
    }
    Ok(out)
}

pub fn decode_nrrd(bytes: &[u8]) -> Result<Volume> {
    let (header, offset) = parse_header(bytes)?;
    let body = &bytes[offset..];
    let payload: Cow<'_, [u8]> = match header.encoding {
        Encoding::Raw => Cow::Borrowed(body),
        Encoding::Gzip => {
            let mut inflated = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut inflated)
                .context("Failed to inflate gzip payload")?;
            Cow::Owned(inflated)
        }
    };

    let count = header
        .sizes
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| anyhow!("NRRD sizes {:?} are too large", header.sizes))?;
    let expected = count * header.sample_type.width();
    if payload.len() != expected {
        bail!(
            "NRRD payload holds {} bytes, expected {} for sizes {:?} of {}",
            payload.len(),
            expected,
            header.sizes,
            header.sample_type.name()
        );
    }

    let order = fortran_order(&header.sizes);
    let big = header.big_endian;
    let data = match header.sample_type {
        SampleType::U8 => VolumeData::U8(read_samples(&payload, &order, big)),
        SampleType::I8 => VolumeData::I8(read_samples(&payload, &order, big)),
        SampleType::U16 => VolumeData::U16(read_samples(&payload, &order, big)),
        SampleType::I16 => VolumeData::I16(read_samples(&payload, &order, big)),
        SampleType::U32 => VolumeData::U32(read_samples(&payload, &order, big)),
        SampleType::I32 => VolumeData::I32(read_samples(&payload, &order, big)),
        SampleType::U64 => VolumeData::U64(read_samples(&payload, &order, big)),
        SampleType::I64 => VolumeData::I64(read_samples(&payload, &order, big)),
        SampleType::F32 => VolumeData::F32(read_samples(&payload, &order, big)),
        SampleType::F64 => VolumeData::F64(read_samples(&payload, &order, big)),
    };
    Volume::new(header.sizes, data)
}

struct Header {
    sample_type: SampleType,
    sizes: Vec<usize>,
    big_endian: bool,
    encoding: Encoding,
}

fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    let mut sample_type = None;
    let mut dimension = None;
    let mut sizes = None;
    let mut big_endian = false;
    let mut encoding = None;

    let mut start = 0;
    let mut line_no = 0;
    let offset = loop {
        let Some(len) = bytes[start..].iter().position(|&b| b == b'\n') else {
            bail!("NRRD header is not terminated by a blank line");
        };
        let raw = &bytes[start..start + len];
        start += len + 1;
        line_no += 1;
        let line = std::str::from_utf8(raw)
            .with_context(|| format!("NRRD header line {line_no} is not valid UTF-8"))?
            .trim_end_matches('\r');

        if line_no == 1 {
            if !line.starts_with(MAGIC_PREFIX) {
                bail!("Missing NRRD magic, found '{line:.60}'");
            }
            continue;
        }
        if line.is_empty() {
            break start;
        }
        if line.starts_with('#') || line.contains(":=") {
            continue;
        }
        let Some((field, value)) = line.split_once(": ") else {
            bail!("Malformed NRRD header line {line_no}: '{line:.60}'");
        };
        let value = value.trim();
        match field.trim() {
            "type" => sample_type = Some(SampleType::parse(value)?),
            "dimension" => {
                dimension = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| anyhow!("Invalid NRRD dimension '{value}'"))?,
                )
            }
            "sizes" => {
                sizes = Some(
                    value
                        .split_whitespace()
                        .map(|token| {
                            token
                                .parse::<usize>()
                                .map_err(|_| anyhow!("Invalid NRRD size '{token}'"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            "endian" => {
                big_endian = match value {
                    "little" => false,
                    "big" => true,
                    other => bail!("Unsupported NRRD endian '{other}'"),
                }
            }
            "encoding" => encoding = Some(value.parse::<Encoding>()?),
            "data file" | "datafile" => bail!("Detached NRRD data files are not supported"),
            "line skip" | "lineskip" | "byte skip" | "byteskip" => {
                if value != "0" {
                    bail!("NRRD field '{}' is not supported", field.trim());
                }
            }
            _ => {}
        }
    };

    let sample_type = sample_type.ok_or_else(|| anyhow!("NRRD header is missing 'type'"))?;
    let dimension = dimension.ok_or_else(|| anyhow!("NRRD header is missing 'dimension'"))?;
    let sizes = sizes.ok_or_else(|| anyhow!("NRRD header is missing 'sizes'"))?;
    let encoding = encoding.ok_or_else(|| anyhow!("NRRD header is missing 'encoding'"))?;
    if sizes.len() != dimension {
        bail!(
            "NRRD dimension {} does not match {} size(s)",
            dimension,
            sizes.len()
        );
    }

    Ok((
        Header {
            sample_type,
            sizes,
            big_endian,
            encoding,
        },
        offset,
    ))
}

fn payload_bytes(volume: &Volume) -> Vec<u8> {
    let order = fortran_order(volume.shape());
    match volume.data() {
        VolumeData::U8(buf) => write_samples(buf, &order),
        VolumeData::I8(buf) => write_samples(buf, &order),
        VolumeData::U16(buf) => write_samples(buf, &order),
        VolumeData::I16(buf) => write_samples(buf, &order),
        VolumeData::U32(buf) => write_samples(buf, &order),
        VolumeData::I32(buf) => write_samples(buf, &order),
        VolumeData::U64(buf) => write_samples(buf, &order),
        VolumeData::I64(buf) => write_samples(buf, &order),
        VolumeData::F32(buf) => write_samples(buf, &order),
        VolumeData::F64(buf) => write_samples(buf, &order),
    }
}

fn write_samples<T: Sample>(buf: &[T], order: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(order.len() * T::WIDTH);
    for &index in order {
        buf[index].put_le(&mut out);
    }
    out
}

fn read_samples<T: Sample>(payload: &[u8], order: &[usize], big_endian: bool) -> Vec<T> {
    let mut out = vec![T::default(); order.len()];
    for (chunk, &index) in payload.chunks_exact(T::WIDTH).zip(order) {
        out[index] = T::read(chunk, big_endian);
    }
    out
}

/// Row-major buffer offsets visited in NRRD order (first axis fastest).
fn fortran_order(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    let total: usize = shape.iter().product();
    let mut order = Vec::with_capacity(total);
    let mut counter = vec![0usize; shape.len()];
    for _ in 0..total {
        order.push(counter.iter().zip(&strides).map(|(i, s)| i * s).sum());
        for axis in 0..shape.len() {
            counter[axis] += 1;
            if counter[axis] < shape[axis] {
                break;
            }
            counter[axis] = 0;
        }
    }
    order
}
