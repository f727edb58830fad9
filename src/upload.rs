use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};

use crate::api::Platform;

/// Files submitted together as one multiview group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadGroup {
    pub name: String,
    pub paths: Vec<PathBuf>,
}

impl UploadGroup {
    /// The IR volume always leads, followed by the point-cloud channels.
    pub fn new(name: String, ir: PathBuf, channels: Vec<PathBuf>) -> Self {
        let mut paths = Vec::with_capacity(channels.len() + 1);
        paths.push(ir);
        paths.extend(channels);
        Self { name, paths }
    }
}

/// Second `_`-separated token of the converted IR file name, extension
/// included (`IR_0001.nrrd` -> `0001.nrrd`, `ir_0001_cam0.nrrd` -> `0001`).
pub fn group_name(ir_path: &Path) -> Result<String> {
    let file_name = ir_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Path {} has no UTF-8 file name", ir_path.display()))?;
    match file_name.split('_').nth(1) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => bail!(
            "Cannot derive a group name from '{file_name}': expected '<prefix>_<group>...'"
        ),
    }
}

/// Uploads `group` into the dataset and returns how many images were registered.
pub fn upload_group<P: Platform + ?Sized>(
    platform: &P,
    dataset_id: u64,
    group: &UploadGroup,
) -> Result<usize> {
    let infos = platform.upload_multiview_images(dataset_id, &group.name, &group.paths)?;
    Ok(infos.len())
}
