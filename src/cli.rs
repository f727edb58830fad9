use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

use crate::constants::{
    CREDENTIALS_ENV_FILE, DEFAULT_DATASET_NAME, DEFAULT_IMAGES_DIR, DEFAULT_PROJECT_NAME,
    DEFAULT_TEMP_DIR, LOCAL_ENV_FILE,
};
use crate::env::home_file;
use crate::nrrd::Encoding;

pub const USAGE: &str = "Usage: slyview [--images <dir>] [--temp <dir>] [--env <file>] [--local-env <file>]\n               [--project <name>] [--dataset <name>] [--encoding gzip|raw]\n               [--threads <N>] [--dry-run]";

pub enum Command {
    Upload(UploadConfig),
    Help,
}

#[derive(Debug)]
pub struct UploadConfig {
    pub images_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Env files in precedence order.
    pub env_files: Vec<PathBuf>,
    pub project_name: String,
    pub dataset_name: String,
    pub encoding: Encoding,
    pub threads: Option<usize>,
    pub dry_run: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            env_files: home_file(CREDENTIALS_ENV_FILE)
                .into_iter()
                .chain(std::iter::once(PathBuf::from(LOCAL_ENV_FILE)))
                .collect(),
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            dataset_name: DEFAULT_DATASET_NAME.to_string(),
            encoding: Encoding::default(),
            threads: None,
            dry_run: false,
        }
    }
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let mut config = UploadConfig::default();
    let mut credentials_env = None;
    let mut local_env = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg, None),
        };
        let mut value = |name: &str| -> Result<String> {
            if let Some(value) = inline.clone() {
                return Ok(value);
            }
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {name}\n{USAGE}"))
        };

        match flag {
            "--help" | "-h" => return Ok(Command::Help),
            "--images" => config.images_dir = PathBuf::from(value(flag)?),
            "--temp" => config.temp_dir = PathBuf::from(value(flag)?),
            "--env" => credentials_env = Some(PathBuf::from(value(flag)?)),
            "--local-env" => local_env = Some(PathBuf::from(value(flag)?)),
            "--project" => config.project_name = parse_name(flag, &value(flag)?)?,
            "--dataset" => config.dataset_name = parse_name(flag, &value(flag)?)?,
            "--encoding" => config.encoding = value(flag)?.parse()?,
            "--threads" => config.threads = Some(parse_threads(&value(flag)?)?),
            "--dry-run" => {
                config.dry_run = match inline.as_deref() {
                    Some(value) => value
                        .parse::<bool>()
                        .map_err(|_| anyhow!("Invalid value for --dry-run (expected true/false)"))?,
                    None => true,
                }
            }
            _ => bail!("Unexpected argument: {arg}\n{USAGE}"),
        }
        i += 1;
    }

    if credentials_env.is_some() || local_env.is_some() {
        config.env_files = credentials_env
            .or_else(|| home_file(CREDENTIALS_ENV_FILE))
            .into_iter()
            .chain(Some(local_env.unwrap_or_else(|| PathBuf::from(LOCAL_ENV_FILE))))
            .collect();
    }

    Ok(Command::Upload(config))
}

fn parse_name(flag: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} must not be empty");
    }
    Ok(trimmed.to_string())
}

fn parse_threads(value: &str) -> Result<usize> {
    let threads: usize = value
        .parse()
        .map_err(|_| anyhow!("Invalid thread count '{value}'"))?;
    if threads == 0 {
        bail!("Thread count must be > 0");
    }
    Ok(threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn upload(values: &[&str]) -> UploadConfig {
        match parse_args(&args(values)).unwrap() {
            Command::Upload(config) => config,
            Command::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn defaults_match_the_expected_layout() {
        let config = upload(&[]);
        assert_eq!(config.images_dir, PathBuf::from("images_data"));
        assert_eq!(config.temp_dir, PathBuf::from("temp_data"));
        assert_eq!(config.project_name, "emotion_upload");
        assert_eq!(config.dataset_name, "cameras");
        assert_eq!(config.encoding, Encoding::Gzip);
        assert_eq!(config.threads, None);
        assert!(!config.dry_run);
        assert_eq!(config.env_files.last(), Some(&PathBuf::from("local.env")));
    }

    #[test]
    fn accepts_separate_and_inline_values() {
        let config = upload(&[
            "--images",
            "/data/in",
            "--temp=/data/tmp",
            "--project=proj",
            "--dataset",
            "ds",
            "--encoding=raw",
            "--threads",
            "4",
            "--dry-run",
        ]);
        assert_eq!(config.images_dir, PathBuf::from("/data/in"));
        assert_eq!(config.temp_dir, PathBuf::from("/data/tmp"));
        assert_eq!(config.project_name, "proj");
        assert_eq!(config.dataset_name, "ds");
        assert_eq!(config.encoding, Encoding::Raw);
        assert_eq!(config.threads, Some(4));
        assert!(config.dry_run);
    }

    #[test]
    fn env_file_overrides_keep_order() {
        let config = upload(&["--env", "/etc/sly.env", "--local-env=ws.env"]);
        assert_eq!(
            config.env_files,
            vec![PathBuf::from("/etc/sly.env"), PathBuf::from("ws.env")]
        );
    }

    #[test]
    fn help_is_recognised() {
        assert!(matches!(parse_args(&args(&["-h"])).unwrap(), Command::Help));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_args(&args(&["--threads", "0"])).is_err());
        assert!(parse_args(&args(&["--threads=x"])).is_err());
        assert!(parse_args(&args(&["--encoding", "zstd"])).is_err());
        assert!(parse_args(&args(&["--project", " "])).is_err());
        assert!(parse_args(&args(&["--images"])).is_err());
        assert!(parse_args(&args(&["stray"])).is_err());
    }
}
