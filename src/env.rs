use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

pub const SERVER_ADDRESS: &str = "SERVER_ADDRESS";
pub const API_TOKEN: &str = "API_TOKEN";
pub const TEAM_ID: &str = "TEAM_ID";
pub const WORKSPACE_ID: &str = "WORKSPACE_ID";

/// Connection and placement settings, resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub server_address: String,
    pub api_token: String,
    pub team_id: u64,
    pub workspace_id: u64,
}

impl Settings {
    /// Reads `files` in order and resolves every key, preferring the process
    /// environment over file contents. Earlier files win over later ones.
    pub fn load(files: &[PathBuf]) -> Result<Self> {
        let vars = EnvVars::from_files(files)?;
        Self::resolve(|key| std::env::var(key).ok().or_else(|| vars.get(key)))
    }

    /// Like [`Settings::load`] but tolerates missing credentials; ids default
    /// to 0 when absent.
    pub fn load_offline(files: &[PathBuf]) -> Result<Self> {
        let vars = EnvVars::from_files(files)?;
        Self::resolve_offline(|key| std::env::var(key).ok().or_else(|| vars.get(key)))
    }

    pub fn resolve<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let server_address = normalize_server_address(&required(&lookup, SERVER_ADDRESS)?)?;
        let api_token = required(&lookup, API_TOKEN)?;
        let team_id = parse_id(TEAM_ID, &required(&lookup, TEAM_ID)?)?;
        let workspace_id = parse_id(WORKSPACE_ID, &required(&lookup, WORKSPACE_ID)?)?;
        Ok(Self {
            server_address,
            api_token,
            team_id,
            workspace_id,
        })
    }

    pub fn resolve_offline<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let optional_id = |key: &str| match non_empty(&lookup, key) {
            Some(value) => parse_id(key, &value),
            None => Ok(0),
        };
        Ok(Self {
            server_address: non_empty(&lookup, SERVER_ADDRESS).unwrap_or_default(),
            api_token: non_empty(&lookup, API_TOKEN).unwrap_or_default(),
            team_id: optional_id(TEAM_ID)?,
            workspace_id: optional_id(WORKSPACE_ID)?,
        })
    }
}

/// Key/value pairs collected from dotenv-style files.
#[derive(Debug, Default)]
pub struct EnvVars {
    values: HashMap<String, String>,
}

impl EnvVars {
    /// Missing files are skipped.
    pub fn from_files(files: &[PathBuf]) -> Result<Self> {
        let mut vars = Self::default();
        for path in files {
            if !path.is_file() {
                continue;
            }
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read env file {}", path.display()))?;
            let parsed = parse_env(&contents)
                .with_context(|| format!("Failed to parse env file {}", path.display()))?;
            for (key, value) in parsed {
                vars.values.entry(key).or_insert(value);
            }
        }
        Ok(vars)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Parses `KEY=VALUE` lines. Supports `#` comments, an `export ` prefix and
/// single or double quoted values.
pub fn parse_env(contents: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            bail!("Line {} is not KEY=VALUE: '{}'", index + 1, line);
        };
        let key = key.trim();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            bail!("Line {} has an invalid key '{}'", index + 1, key);
        }
        out.push((key.to_string(), unquote(value.trim())));
    }
    Ok(out)
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Result<String> {
    non_empty(lookup, key).ok_or_else(|| anyhow!("Missing required setting {key}"))
}

fn parse_id(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| anyhow!("{key} must be a non-negative integer, got '{value}'"))
}

fn normalize_server_address(value: &str) -> Result<String> {
    let trimmed = value.trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        bail!("{SERVER_ADDRESS} must start with http:// or https://, got '{value}'");
    }
    Ok(trimmed.to_string())
}

/// `~/<name>` when a home directory is known.
pub fn home_file(name: &str) -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| Path::new(&home).join(name))
}
