use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use rayon::prelude::*;

use crate::api::{DatasetInfo, Platform, ProjectInfo, SuperviselyApi};
use crate::cli::UploadConfig;
use crate::convert::{convert_to_nrrd, file_stem};
use crate::dry_run::DryRun;
use crate::env::Settings;
use crate::nrrd::Encoding;
use crate::pairs::{ImagePair, image_pairs};
use crate::progress::{pair_bar, spinner};
use crate::split::split_to_channels;
use crate::upload::{UploadGroup, group_name, upload_group};

pub struct Bootstrap {
    pub project: ProjectInfo,
    pub dataset: DatasetInfo,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pairs: usize,
    pub files_written: usize,
    pub images_uploaded: usize,
}

pub fn run_upload(config: &UploadConfig) -> Result<()> {
    let settings = if config.dry_run {
        Settings::load_offline(&config.env_files)?
    } else {
        Settings::load(&config.env_files)?
    };

    fs::create_dir_all(&config.temp_dir).with_context(|| {
        format!(
            "Failed to create scratch directory {}",
            config.temp_dir.display()
        )
    })?;

    if config.dry_run {
        println!(
            "{} Dry run: files are converted locally, nothing is sent to the server",
            "ℹ".blue().bold()
        );
        println!(
            "Dry run for team_id={}, workspace_id={}",
            settings.team_id, settings.workspace_id
        );
        run_with_platform(&DryRun::default(), settings.workspace_id, config)
    } else {
        let api = SuperviselyApi::from_settings(&settings)?;
        println!(
            "API instance created for team_id={}, workspace_id={}",
            settings.team_id, settings.workspace_id
        );
        run_with_platform(&api, settings.workspace_id, config)
    }
}

fn run_with_platform<P: Platform>(
    platform: &P,
    workspace_id: u64,
    config: &UploadConfig,
) -> Result<()> {
    let boot = bootstrap(
        platform,
        workspace_id,
        &config.project_name,
        &config.dataset_name,
    )?;
    let stats = process_pairs(platform, boot.dataset.id, config)?;
    print_summary(config, &boot, &stats);
    Ok(())
}

/// Resolves the project, enables multiview on it and creates a fresh dataset.
pub fn bootstrap<P: Platform + ?Sized>(
    platform: &P,
    workspace_id: u64,
    project_name: &str,
    dataset_name: &str,
) -> Result<Bootstrap> {
    let pb = spinner("Preparing project");
    pb.set_message(project_name.to_string());
    let project = pb.suspend(|| platform.get_or_create_project(workspace_id, project_name))?;
    pb.suspend(|| platform.set_multiview_settings(project.id))?;
    pb.set_message(dataset_name.to_string());
    let dataset = pb.suspend(|| platform.create_dataset(project.id, dataset_name, true))?;
    pb.finish_and_clear();

    println!(
        "{} Project '{}' (id {}) with multiview enabled",
        "ℹ".blue().bold(),
        project.name,
        project.id
    );
    if dataset.name != dataset_name {
        println!(
            "{} Dataset '{}' already existed, created '{}' instead",
            "⚠".yellow().bold(),
            dataset_name,
            dataset.name
        );
    }
    println!(
        "{} Dataset '{}' (id {})",
        "ℹ".blue().bold(),
        dataset.name,
        dataset.id
    );
    Ok(Bootstrap { project, dataset })
}

/// Converts, splits and uploads every pair under `config.images_dir`.
///
/// With `--threads` the local conversion of all pairs runs on the rayon pool
/// first; uploads always happen one group at a time in pair order.
pub fn process_pairs<P: Platform + ?Sized>(
    platform: &P,
    dataset_id: u64,
    config: &UploadConfig,
) -> Result<RunStats> {
    let pairs = image_pairs(&config.images_dir)?;
    check_unique_outputs(&pairs)?;
    let mut stats = RunStats {
        pairs: pairs.len(),
        ..RunStats::default()
    };

    if config.threads.is_some() {
        let convert_pb = pair_bar(pairs.len(), "Converting");
        let groups = pairs
            .par_iter()
            .map(|pair| {
                let group = prepare_group(pair, &config.temp_dir, config.encoding);
                convert_pb.inc(1);
                group
            })
            .collect::<Result<Vec<_>>>()?;
        convert_pb.finish_and_clear();

        let upload_pb = pair_bar(groups.len(), "Uploading");
        for group in &groups {
            upload_pb.set_message(group.name.clone());
            stats.files_written += files_written(group);
            stats.images_uploaded += upload_and_report(platform, dataset_id, group, &upload_pb)?;
            upload_pb.inc(1);
        }
        upload_pb.finish_and_clear();
    } else {
        let pb = pair_bar(pairs.len(), "Processing");
        for pair in &pairs {
            pb.set_message(display_name(&pair.ir));
            let group = prepare_group(pair, &config.temp_dir, config.encoding)?;
            stats.files_written += files_written(&group);
            stats.images_uploaded += upload_and_report(platform, dataset_id, &group, &pb)?;
            pb.inc(1);
        }
        pb.finish_and_clear();
    }

    Ok(stats)
}

/// Every source must map to its own `{stem}.nrrd` in the scratch directory.
fn check_unique_outputs(pairs: &[ImagePair]) -> Result<()> {
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for path in pairs
        .iter()
        .flat_map(|pair| [pair.ir.as_path(), pair.point_cloud.as_path()])
    {
        let stem = file_stem(path)?;
        if let Some(previous) = seen.insert(stem, path) {
            bail!(
                "{} and {} would both be converted to {stem}.nrrd",
                previous.display(),
                path.display()
            );
        }
    }
    Ok(())
}

/// Converts both members of a pair and splits the point cloud into channels.
pub fn prepare_group(
    pair: &ImagePair,
    temp_dir: &Path,
    encoding: Encoding,
) -> Result<UploadGroup> {
    let ir_nrrd = convert_to_nrrd(&pair.ir, temp_dir, encoding)?;
    let pc_nrrd = convert_to_nrrd(&pair.point_cloud, temp_dir, encoding)?;
    let name = group_name(&ir_nrrd)?;
    let channels = split_to_channels(&pc_nrrd, temp_dir, encoding)?;
    Ok(UploadGroup::new(name, ir_nrrd, channels))
}

fn upload_and_report<P: Platform + ?Sized>(
    platform: &P,
    dataset_id: u64,
    group: &UploadGroup,
    pb: &ProgressBar,
) -> Result<usize> {
    let count = upload_group(platform, dataset_id, group)?;
    let line = uploaded_line(group, count);
    pb.suspend(|| println!("{line}"));
    Ok(count)
}

fn uploaded_line(group: &UploadGroup, count: usize) -> String {
    format!("Uploaded {} with {} images", group.name, count)
}

// IR volume, point-cloud volume and one file per channel.
fn files_written(group: &UploadGroup) -> usize {
    group.paths.len() + 1
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("pair")
        .to_string()
}

fn print_summary(config: &UploadConfig, boot: &Bootstrap, stats: &RunStats) {
    println!();
    println!(
        "{} {}",
        "✔".green().bold(),
        "Multiview upload complete".green().bold()
    );
    println!(
        "  {} {}",
        "Images directory:".bright_black(),
        config.images_dir.display()
    );
    println!(
        "  {} {}",
        "Scratch directory:".bright_black(),
        config.temp_dir.display()
    );
    println!(
        "  {} {} / {}",
        "Destination:".bright_black(),
        boot.project.name,
        boot.dataset.name
    );
    println!(
        "  {} {:>8}    {} {:>10}",
        "Pairs".cyan().bold(),
        stats.pairs,
        "Files written".cyan().bold(),
        stats.files_written
    );
    println!(
        "  {} {:>8}",
        "Images uploaded".yellow().bold(),
        stats.images_uploaded
    );
}
