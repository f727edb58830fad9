use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::constants::NRRD_EXTENSION;
use crate::nrrd::{Encoding, write_nrrd};
use crate::raster::decode_raster;

/// Decodes `source` and writes it as `{temp_dir}/{stem}.nrrd`.
pub fn convert_to_nrrd(source: &Path, temp_dir: &Path, encoding: Encoding) -> Result<PathBuf> {
    let volume = decode_raster(source)?;
    let target = temp_dir.join(format!("{}.{NRRD_EXTENSION}", file_stem(source)?));
    write_nrrd(&target, &volume, encoding)?;
    Ok(target)
}

pub fn file_stem(path: &Path) -> Result<&str> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("Path {} has no UTF-8 file name", path.display()))
}
