use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::constants::{CHANNEL_INFIX, NRRD_EXTENSION};
use crate::convert::file_stem;
use crate::nrrd::{Encoding, read_nrrd, write_nrrd};

/// Writes every `[:, :, i]` slice of a 3D NRRD as
/// `{temp_dir}/{stem}_channel_{i}.nrrd`, returning the paths in index order.
pub fn split_to_channels(
    nrrd_path: &Path,
    temp_dir: &Path,
    encoding: Encoding,
) -> Result<Vec<PathBuf>> {
    let volume = read_nrrd(nrrd_path)?;
    let Some(channels) = volume.channels() else {
        bail!(
            "Cannot split {} into channels: expected a 3D volume, got shape {:?}",
            nrrd_path.display(),
            volume.shape()
        );
    };
    let stem = file_stem(nrrd_path)?;

    let mut paths = Vec::with_capacity(channels);
    for index in 0..channels {
        let slice = volume.channel(index)?;
        let path = temp_dir.join(format!("{stem}{CHANNEL_INFIX}{index}.{NRRD_EXTENSION}"));
        write_nrrd(&path, &slice, encoding)?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::volume::{Volume, VolumeData};

    #[test]
    fn writes_one_file_per_channel_in_order() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("pc_0001.nrrd");
        // 2x2 pixels, 4 channels: value = channel * 100 + pixel
        let data: Vec<i32> = (0..4)
            .flat_map(|px| (0..4).map(move |c| c * 100 + px))
            .collect();
        let volume = Volume::new(vec![2, 2, 4], VolumeData::I32(data)).unwrap();
        write_nrrd(&source, &volume, Encoding::Gzip).unwrap();

        let paths = split_to_channels(&source, dir.path(), Encoding::Raw).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "pc_0001_channel_0.nrrd",
                "pc_0001_channel_1.nrrd",
                "pc_0001_channel_2.nrrd",
                "pc_0001_channel_3.nrrd",
            ]
        );
        for (index, path) in paths.iter().enumerate() {
            let slice = read_nrrd(path).unwrap();
            let c = index as i32;
            assert_eq!(slice.shape(), &[2, 2]);
            assert_eq!(
                slice.data(),
                &VolumeData::I32(vec![c * 100, c * 100 + 1, c * 100 + 2, c * 100 + 3])
            );
        }
    }

    #[test]
    fn two_dimensional_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ir_0001.nrrd");
        let volume = Volume::new(vec![1, 3], VolumeData::U8(vec![1, 2, 3])).unwrap();
        write_nrrd(&source, &volume, Encoding::Raw).unwrap();

        let err = split_to_channels(&source, dir.path(), Encoding::Raw).unwrap_err();
        assert!(err.to_string().contains("expected a 3D volume"));
        assert!(!dir.path().join("ir_0001_channel_0.nrrd").exists());
    }
}
