use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::constants::{IR_DIR, POINT_CLOUD_DIR};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePair {
    pub ir: PathBuf,
    pub point_cloud: PathBuf,
}

/// Pairs `ir_images/*` with `point_clouds/*` by sorted position.
///
/// Only the counts are checked; matching names across the two directories is
/// the caller's responsibility.
pub fn image_pairs(images_dir: &Path) -> Result<Vec<ImagePair>> {
    let ir_dir = images_dir.join(IR_DIR);
    let pc_dir = images_dir.join(POINT_CLOUD_DIR);
    let mut ir_images = list_files(&ir_dir)?;
    let mut pc_images = list_files(&pc_dir)?;
    ir_images.sort();
    pc_images.sort();

    if ir_images.len() != pc_images.len() {
        bail!(
            "Found {} file(s) in {} but {} in {}; every IR image needs a point cloud",
            ir_images.len(),
            ir_dir.display(),
            pc_images.len(),
            pc_dir.display()
        );
    }

    Ok(ir_images
        .into_iter()
        .zip(pc_images)
        .map(|(ir, point_cloud)| ImagePair { ir, point_cloud })
        .collect())
}

/// Regular files directly inside `dir`, in directory order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}
