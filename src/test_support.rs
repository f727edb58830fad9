use std::cell::RefCell;
use std::path::PathBuf;

use anyhow::Result;

use crate::api::{DatasetInfo, ImageInfo, Platform, ProjectInfo, effective_dataset_name};
use crate::upload::UploadGroup;

/// In-memory platform that records every call.
#[derive(Default)]
pub struct RecordingPlatform {
    pub projects: RefCell<Vec<ProjectInfo>>,
    pub datasets: RefCell<Vec<DatasetInfo>>,
    pub multiview_projects: RefCell<Vec<u64>>,
    pub uploads: RefCell<Vec<(u64, UploadGroup)>>,
}

impl Platform for RecordingPlatform {
    fn get_or_create_project(&self, _workspace_id: u64, name: &str) -> Result<ProjectInfo> {
        let mut projects = self.projects.borrow_mut();
        if let Some(project) = projects.iter().find(|project| project.name == name) {
            return Ok(project.clone());
        }
        let project = ProjectInfo {
            id: projects.len() as u64 + 1,
            name: name.to_string(),
        };
        projects.push(project.clone());
        Ok(project)
    }

    fn set_multiview_settings(&self, project_id: u64) -> Result<()> {
        self.multiview_projects.borrow_mut().push(project_id);
        Ok(())
    }

    fn create_dataset(
        &self,
        project_id: u64,
        name: &str,
        change_name_if_conflict: bool,
    ) -> Result<DatasetInfo> {
        let mut datasets = self.datasets.borrow_mut();
        let siblings: Vec<DatasetInfo> = datasets
            .iter()
            .filter(|dataset| dataset.project_id == Some(project_id))
            .cloned()
            .collect();
        let dataset = DatasetInfo {
            id: datasets.len() as u64 + 100,
            name: effective_dataset_name(&siblings, name, change_name_if_conflict)?,
            project_id: Some(project_id),
        };
        datasets.push(dataset.clone());
        Ok(dataset)
    }

    fn upload_multiview_images(
        &self,
        dataset_id: u64,
        group_name: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>> {
        self.uploads.borrow_mut().push((
            dataset_id,
            UploadGroup {
                name: group_name.to_string(),
                paths: paths.to_vec(),
            },
        ));
        Ok(paths
            .iter()
            .enumerate()
            .map(|(index, path)| ImageInfo {
                id: index as u64 + 1,
                name: path.file_name().unwrap().to_string_lossy().into_owned(),
                hash: None,
            })
            .collect())
    }
}
