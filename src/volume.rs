use anyhow::{Result, anyhow, bail};

/// Typed sample buffer of a [`Volume`], stored row-major (last axis fastest).
#[derive(Clone, Debug, PartialEq)]
pub enum VolumeData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Applies `$body` to the inner buffer and wraps the result back into the
/// same variant.
macro_rules! map_data {
    ($data:expr, |$buf:ident| $body:expr) => {
        match $data {
            VolumeData::U8($buf) => VolumeData::U8($body),
            VolumeData::I8($buf) => VolumeData::I8($body),
            VolumeData::U16($buf) => VolumeData::U16($body),
            VolumeData::I16($buf) => VolumeData::I16($body),
            VolumeData::U32($buf) => VolumeData::U32($body),
            VolumeData::I32($buf) => VolumeData::I32($body),
            VolumeData::U64($buf) => VolumeData::U64($body),
            VolumeData::I64($buf) => VolumeData::I64($body),
            VolumeData::F32($buf) => VolumeData::F32($body),
            VolumeData::F64($buf) => VolumeData::F64($body),
        }
    };
}

impl VolumeData {
    pub fn len(&self) -> usize {
        match self {
            VolumeData::U8(buf) => buf.len(),
            VolumeData::I8(buf) => buf.len(),
            VolumeData::U16(buf) => buf.len(),
            VolumeData::I16(buf) => buf.len(),
            VolumeData::U32(buf) => buf.len(),
            VolumeData::I32(buf) => buf.len(),
            VolumeData::U64(buf) => buf.len(),
            VolumeData::I64(buf) => buf.len(),
            VolumeData::F32(buf) => buf.len(),
            VolumeData::F64(buf) => buf.len(),
        }
    }
}

/// A 2D `[H, W]` or 3D `[H, W, C]` array of samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    shape: Vec<usize>,
    data: VolumeData,
}

impl Volume {
    pub fn new(shape: Vec<usize>, data: VolumeData) -> Result<Self> {
        if shape.is_empty() {
            bail!("Volume shape must have at least one axis");
        }
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| anyhow!("Volume shape {:?} is too large", shape))?;
        if data.len() != expected {
            bail!(
                "Sample count {} does not match shape {:?} ({} expected)",
                data.len(),
                shape,
                expected
            );
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &VolumeData {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Length of the last axis of a 3D volume.
    pub fn channels(&self) -> Option<usize> {
        match self.shape.as_slice() {
            [_, _, channels] => Some(*channels),
            _ => None,
        }
    }

    /// Extracts the 2D slice `[:, :, index]`.
    pub fn channel(&self, index: usize) -> Result<Volume> {
        let channels = self.channels().ok_or_else(|| {
            anyhow!(
                "Expected a 3D volume to index channels, got shape {:?}",
                self.shape
            )
        })?;
        if index >= channels {
            bail!("Channel {index} is out of bounds for {channels} channel(s)");
        }
        let shape = vec![self.shape[0], self.shape[1]];
        let data = map_data!(&self.data, |buf| take_strided(buf, index, channels));
        Volume::new(shape, data)
    }
}

fn take_strided<T: Copy>(buf: &[T], offset: usize, stride: usize) -> Vec<T> {
    buf.iter().skip(offset).step_by(stride).copied().collect()
}
