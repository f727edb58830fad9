use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::constants::{API_PREFIX, MULTIVIEW_TAG_NAME};
use crate::env::Settings;

const CONNECT_TIMEOUT_SECONDS: u64 = 30;
const HASH_CHECK_BATCH: usize = 900;
const MULTIVIEW_TAG_COLOR: &str = "#3F9CE8";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DatasetInfo {
    pub id: u64,
    pub name: String,
    #[serde(rename = "projectId", default)]
    pub project_id: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Remote operations the upload pipeline depends on.
pub trait Platform {
    /// Returns the project named `name` in the workspace, creating it if absent.
    fn get_or_create_project(&self, workspace_id: u64, name: &str) -> Result<ProjectInfo>;

    /// Turns on multiview grouping for a project. Safe to repeat.
    fn set_multiview_settings(&self, project_id: u64) -> Result<()>;

    fn create_dataset(
        &self,
        project_id: u64,
        name: &str,
        change_name_if_conflict: bool,
    ) -> Result<DatasetInfo>;

    /// Uploads `paths` in order as one multiview group named `group_name`.
    fn upload_multiview_images(
        &self,
        dataset_id: u64,
        group_name: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>>;
}

/// Supervisely public API client.
pub struct SuperviselyApi {
    client: Client,
    base_url: String,
    token: String,
    multiview_tags: RefCell<HashMap<u64, u64>>,
}

impl SuperviselyApi {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .timeout(None)
            .build()
            .context("Failed to build HTTP client for Supervisely")?;
        Ok(Self {
            client,
            base_url: format!("{}/{API_PREFIX}", settings.server_address),
            token: settings.api_token.clone(),
            multiview_tags: RefCell::new(HashMap::new()),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    fn post<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(self.url(method))
            .header("x-api-key", &self.token)
            .json(body)
            .send()
            .with_context(|| format!("Failed to call Supervisely method '{method}'"))?;
        decode_response(method, response)
    }

    /// Collects `entities` across every page of a `*.list` method.
    fn list_all<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut page = 1u64;
        loop {
            let mut request = body.clone();
            request["page"] = json!(page);
            let listing: ListPage<T> = self.post(method, &request)?;
            out.extend(listing.entities);
            if page >= listing.pages_count.unwrap_or(1) {
                break;
            }
            page += 1;
        }
        Ok(out)
    }

    fn project_meta(&self, project_id: u64) -> Result<Value> {
        self.post("projects.meta", &json!({ "id": project_id }))
    }

    /// Id of the `multiview` tag meta, adding it to the project meta if missing.
    fn ensure_multiview_tag(&self, project_id: u64) -> Result<u64> {
        if let Some(id) = self.multiview_tags.borrow().get(&project_id) {
            return Ok(*id);
        }

        let mut meta = self.project_meta(project_id)?;
        let id = match find_tag_id(&meta, MULTIVIEW_TAG_NAME) {
            Some(id) => id,
            None => {
                add_multiview_tag(&mut meta)?;
                let _: Value = self.post(
                    "projects.meta.update",
                    &json!({ "id": project_id, "meta": meta }),
                )?;
                let refreshed = self.project_meta(project_id)?;
                find_tag_id(&refreshed, MULTIVIEW_TAG_NAME).ok_or_else(|| {
                    anyhow!("Project {project_id} has no '{MULTIVIEW_TAG_NAME}' tag after update")
                })?
            }
        };
        self.multiview_tags.borrow_mut().insert(project_id, id);
        Ok(id)
    }

    fn dataset_info(&self, dataset_id: u64) -> Result<DatasetInfo> {
        self.post("datasets.info", &json!({ "id": dataset_id }))
    }

    fn upload_missing(&self, files: &[HashedFile]) -> Result<()> {
        let hashes: Vec<&str> = files.iter().map(|file| file.hash.as_str()).collect();
        let mut known = HashSet::new();
        for batch in hashes.chunks(HASH_CHECK_BATCH) {
            let existing: Vec<String> =
                self.post("images.internal.hashes.list", &json!(batch))?;
            known.extend(existing);
        }

        let mut form = Form::new();
        let mut pending = 0;
        for file in files_to_upload(files, &known) {
            let bytes = fs::read(&file.path)
                .with_context(|| format!("Failed to read {}", file.path.display()))?;
            let part = Part::bytes(bytes)
                .file_name(pending.to_string())
                .mime_str("image/*")?;
            form = form.part(format!("{pending}-file"), part);
            pending += 1;
        }
        if pending == 0 {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url("images.bulk.upload"))
            .header("x-api-key", &self.token)
            .multipart(form)
            .send()
            .context("Failed to call Supervisely method 'images.bulk.upload'")?;
        let uploaded: Vec<Value> = decode_response("images.bulk.upload", response)?;
        let stored = uploaded
            .iter()
            .filter(|entry| entry.get("hash").is_some())
            .count();
        if stored != pending {
            bail!("images.bulk.upload stored {stored} of {pending} file(s)");
        }
        Ok(())
    }
}

impl Platform for SuperviselyApi {
    fn get_or_create_project(&self, workspace_id: u64, name: &str) -> Result<ProjectInfo> {
        let existing: Vec<ProjectInfo> =
            self.list_all("projects.list", project_lookup_body(workspace_id, name))?;
        if let Some(project) = existing.into_iter().find(|project| project.name == name) {
            return Ok(project);
        }
        self.post("projects.add", &project_add_body(workspace_id, name))
    }

    fn set_multiview_settings(&self, project_id: u64) -> Result<()> {
        let tag_id = self.ensure_multiview_tag(project_id)?;
        let _: Value = self.post(
            "projects.settings.update",
            &multiview_settings_body(project_id, tag_id),
        )?;
        Ok(())
    }

    fn create_dataset(
        &self,
        project_id: u64,
        name: &str,
        change_name_if_conflict: bool,
    ) -> Result<DatasetInfo> {
        let existing: Vec<DatasetInfo> =
            self.list_all("datasets.list", json!({ "projectId": project_id }))?;
        let effective = effective_dataset_name(&existing, name, change_name_if_conflict)
            .with_context(|| format!("Cannot create dataset in project {project_id}"))?;
        self.post("datasets.add", &dataset_add_body(project_id, &effective))
    }

    fn upload_multiview_images(
        &self,
        dataset_id: u64,
        group_name: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<ImageInfo>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let project_id = self
            .dataset_info(dataset_id)?
            .project_id
            .ok_or_else(|| anyhow!("Dataset {dataset_id} response is missing projectId"))?;
        let tag_id = self.ensure_multiview_tag(project_id)?;

        let files = paths
            .iter()
            .map(|path| HashedFile::read(path))
            .collect::<Result<Vec<_>>>()?;
        self.upload_missing(&files)?;

        let infos: Vec<ImageInfo> = self.post(
            "images.bulk.add",
            &bulk_add_body(dataset_id, tag_id, group_name, &files),
        )?;
        if infos.len() != files.len() {
            bail!(
                "images.bulk.add registered {} of {} image(s) for group '{group_name}'",
                infos.len(),
                files.len()
            );
        }
        Ok(infos)
    }
}

#[derive(Deserialize)]
struct ListPage<T> {
    entities: Vec<T>,
    #[serde(rename = "pagesCount", default)]
    pages_count: Option<u64>,
}

struct HashedFile {
    path: PathBuf,
    name: String,
    hash: String,
}

impl HashedFile {
    fn read(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Path {} has no UTF-8 file name", path.display()))?
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            hash: content_hash(&bytes),
        })
    }
}

fn project_lookup_body(workspace_id: u64, name: &str) -> Value {
    json!({
        "workspaceId": workspace_id,
        "filter": [{ "field": "name", "operator": "=", "value": name }],
    })
}

fn project_add_body(workspace_id: u64, name: &str) -> Value {
    json!({
        "workspaceId": workspace_id,
        "title": name,
        "description": "",
        "type": "images",
    })
}

fn multiview_settings_body(project_id: u64, tag_id: u64) -> Value {
    json!({
        "id": project_id,
        "settings": {
            "groupImages": true,
            "groupImagesSync": false,
            "groupImagesByTagId": tag_id,
        },
    })
}

/// Name to create a dataset under, given the datasets already in the project.
pub fn effective_dataset_name(
    existing: &[DatasetInfo],
    name: &str,
    change_name_if_conflict: bool,
) -> Result<String> {
    let used: HashSet<String> = existing.iter().map(|dataset| dataset.name.clone()).collect();
    if used.contains(name) && !change_name_if_conflict {
        bail!("Dataset '{name}' already exists");
    }
    Ok(free_name(&used, name))
}

fn dataset_add_body(project_id: u64, name: &str) -> Value {
    json!({
        "projectId": project_id,
        "name": name,
        "description": "",
        "changeNameIfConflict": false,
    })
}

/// Files whose content the server lacks, each hash once, in input order.
fn files_to_upload<'a>(files: &'a [HashedFile], known: &HashSet<String>) -> Vec<&'a HashedFile> {
    let mut queued = HashSet::new();
    files
        .iter()
        .filter(|file| !known.contains(&file.hash) && queued.insert(file.hash.as_str()))
        .collect()
}

/// Registers `files` in order, each tagged with the group name.
fn bulk_add_body(dataset_id: u64, tag_id: u64, group_name: &str, files: &[HashedFile]) -> Value {
    let images: Vec<Value> = files
        .iter()
        .map(|file| {
            json!({
                "title": file.name,
                "hash": file.hash,
                "tags": [{ "tagId": tag_id, "value": group_name }],
            })
        })
        .collect();
    json!({ "datasetId": dataset_id, "images": images })
}

/// Base64 SHA-256, the content key the platform stores images under.
pub fn content_hash(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

/// First of `name`, `name_01`, `name_02`, ... not present in `used`.
fn free_name(used: &HashSet<String>, name: &str) -> String {
    if !used.contains(name) {
        return name.to_string();
    }
    (1u32..)
        .map(|suffix| format!("{name}_{suffix:02}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

fn find_tag_id(meta: &Value, name: &str) -> Option<u64> {
    meta.get("tags")?
        .as_array()?
        .iter()
        .find(|tag| tag.get("name").and_then(Value::as_str) == Some(name))?
        .get("id")?
        .as_u64()
}

fn add_multiview_tag(meta: &mut Value) -> Result<()> {
    let object = meta
        .as_object_mut()
        .ok_or_else(|| anyhow!("Project meta is not a JSON object"))?;
    let tags = object.entry("tags").or_insert_with(|| json!([]));
    let tags = tags
        .as_array_mut()
        .ok_or_else(|| anyhow!("Project meta 'tags' is not an array"))?;
    tags.push(json!({
        "name": MULTIVIEW_TAG_NAME,
        "value_type": "any_string",
        "color": MULTIVIEW_TAG_COLOR,
        "applicable_type": "imagesOnly",
        "classes": [],
    }));
    Ok(())
}

fn decode_response<T: DeserializeOwned>(method: &str, response: Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("Failed to read response body of '{method}'"))?;
    if !status.is_success() {
        bail!(
            "Supervisely method '{method}' returned {status}. Body: {}",
            trim_preview(&body)
        );
    }
    serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse response of '{method}'"))
}

fn trim_preview(body: &str) -> String {
    const LIMIT: usize = 600;
    let body = body.trim();
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn free_name_keeps_unused_names() {
        assert_eq!(free_name(&names(&["other"]), "cameras"), "cameras");
    }

    #[test]
    fn free_name_appends_two_digit_suffix() {
        assert_eq!(free_name(&names(&["cameras"]), "cameras"), "cameras_01");
        assert_eq!(
            free_name(&names(&["cameras", "cameras_01", "cameras_02"]), "cameras"),
            "cameras_03"
        );
    }

    fn dataset(id: u64, name: &str) -> DatasetInfo {
        DatasetInfo {
            id,
            name: name.to_string(),
            project_id: Some(1),
        }
    }

    fn hashed(name: &str, hash: &str) -> HashedFile {
        HashedFile {
            path: PathBuf::from("/scratch").join(name),
            name: name.to_string(),
            hash: hash.to_string(),
        }
    }

    #[test]
    fn dataset_name_is_kept_when_free() {
        let existing = [dataset(1, "other")];
        assert_eq!(
            effective_dataset_name(&existing, "cameras", false).unwrap(),
            "cameras"
        );
    }

    #[test]
    fn rerun_gets_a_disambiguated_dataset_name() {
        let existing = [dataset(1, "cameras"), dataset(2, "cameras_01")];
        assert_eq!(
            effective_dataset_name(&existing, "cameras", true).unwrap(),
            "cameras_02"
        );
        let err = effective_dataset_name(&existing, "cameras", false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn dataset_add_never_asks_server_to_rename() {
        let body = dataset_add_body(7, "cameras_01");
        assert_eq!(body["projectId"], 7);
        assert_eq!(body["name"], "cameras_01");
        assert_eq!(body["changeNameIfConflict"], false);
    }

    #[test]
    fn project_requests_filter_and_create_by_name() {
        let lookup = project_lookup_body(3, "emotion_upload");
        assert_eq!(lookup["workspaceId"], 3);
        assert_eq!(
            lookup["filter"],
            json!([{ "field": "name", "operator": "=", "value": "emotion_upload" }])
        );

        let add = project_add_body(3, "emotion_upload");
        assert_eq!(add["title"], "emotion_upload");
        assert_eq!(add["type"], "images");
    }

    #[test]
    fn multiview_settings_group_by_tag() {
        let body = multiview_settings_body(4, 11);
        assert_eq!(body["id"], 4);
        assert_eq!(
            body["settings"],
            json!({ "groupImages": true, "groupImagesSync": false, "groupImagesByTagId": 11 })
        );
    }

    #[test]
    fn bulk_add_keeps_order_and_tags_every_image() {
        let files = [
            hashed("IR_0001.nrrd", "h-ir"),
            hashed("PC_0001_channel_0.nrrd", "h-c0"),
            hashed("PC_0001_channel_1.nrrd", "h-c1"),
        ];
        let body = bulk_add_body(9, 11, "0001.nrrd", &files);
        assert_eq!(body["datasetId"], 9);
        let images = body["images"].as_array().unwrap();
        let titles: Vec<_> = images.iter().map(|image| image["title"].clone()).collect();
        assert_eq!(
            titles,
            vec![
                json!("IR_0001.nrrd"),
                json!("PC_0001_channel_0.nrrd"),
                json!("PC_0001_channel_1.nrrd"),
            ]
        );
        for (image, file) in images.iter().zip(&files) {
            assert_eq!(image["hash"], file.hash.as_str());
            assert_eq!(image["tags"], json!([{ "tagId": 11, "value": "0001.nrrd" }]));
        }
    }

    #[test]
    fn only_unknown_hashes_are_uploaded_once() {
        let files = [
            hashed("a.nrrd", "h1"),
            hashed("b.nrrd", "h2"),
            hashed("c.nrrd", "h2"),
            hashed("d.nrrd", "h3"),
        ];
        let known = names(&["h3"]);
        let pending: Vec<_> = files_to_upload(&files, &known)
            .iter()
            .map(|file| file.name.as_str())
            .collect();
        assert_eq!(pending, vec!["a.nrrd", "b.nrrd"]);
    }

    #[test]
    fn content_hash_is_base64_sha256() {
        assert_eq!(
            content_hash(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn finds_and_adds_multiview_tag() {
        let mut meta = json!({ "classes": [], "tags": [{ "id": 5, "name": "other" }] });
        assert_eq!(find_tag_id(&meta, MULTIVIEW_TAG_NAME), None);

        add_multiview_tag(&mut meta).unwrap();
        let tags = meta["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1]["name"], MULTIVIEW_TAG_NAME);
        assert_eq!(tags[1]["value_type"], "any_string");

        let stored = json!({ "tags": [{ "id": 11, "name": MULTIVIEW_TAG_NAME }] });
        assert_eq!(find_tag_id(&stored, MULTIVIEW_TAG_NAME), Some(11));
    }

    #[test]
    fn add_tag_creates_missing_tag_list() {
        let mut meta = json!({});
        add_multiview_tag(&mut meta).unwrap();
        assert_eq!(meta["tags"].as_array().unwrap().len(), 1);
        assert!(add_multiview_tag(&mut json!([])).is_err());
    }

    #[test]
    fn list_page_tolerates_missing_page_count() {
        let page: ListPage<ProjectInfo> =
            serde_json::from_str(r#"{"entities":[{"id":1,"name":"p","extra":true}]}"#).unwrap();
        assert_eq!(page.entities[0].id, 1);
        assert_eq!(page.pages_count, None);
    }

    #[test]
    fn preview_is_truncated_on_char_boundary() {
        let long = "é".repeat(700);
        let preview = trim_preview(&long);
        assert_eq!(preview.chars().count(), 601);
        assert!(preview.ends_with('…'));
    }
}
