use std::cell::Cell;
use std::path::PathBuf;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::api::{DatasetInfo, ImageInfo, Platform, ProjectInfo};

/// Stand-in platform for `--dry-run`: reports each call and hands out local
/// ids instead of contacting the server.
#[derive(Default)]
pub struct DryRun {
    next_id: Cell<u64>,
}

impl DryRun {
    fn allocate(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

impl Platform for DryRun {
    fn get_or_create_project(&self, workspace_id: u64, name: &str) -> Result<ProjectInfo> {
        println!(
            "  {} would get or create project '{}' in workspace {}",
            "○".bright_black(),
            name,
            workspace_id
        );
        Ok(ProjectInfo {
            id: self.allocate(),
            name: name.to_string(),
        })
    }

    fn set_multiview_settings(&self, project_id: u64) -> Result<()> {
        println!(
            "  {} would enable multiview on project {}",
            "○".bright_black(),
            project_id
        );
        Ok(())
    }

    fn create_dataset(
        &self,
        project_id: u64,
        name: &str,
        _change_name_if_conflict: bool,
    ) -> Result<DatasetInfo> {
        println!(
            "  {} would create dataset '{}' in project {}",
            "○".bright_black(),
            name,
            project_id
        );
        Ok(DatasetInfo {
            id: self.allocate(),
            name: name.to_string(),
            project_id: Some(project_id),
        })
    }

    fn upload_multiview_images(
        &self,
        _dataset_id: u64,
        _group_name: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>> {
        Ok(paths
            .iter()
            .map(|path| ImageInfo {
                id: self.allocate(),
                name: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                hash: None,
            })
            .collect())
    }
}
