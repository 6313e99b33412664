#![forbid(unsafe_code)]

//! Run configuration for the harvester binaries.
//!
//! Settings come from three layers with fixed precedence: explicit
//! overrides (CLI flags) beat process environment variables, which beat
//! the `.env` file next to the working directory. Only the output root
//! and the API key are mandatory; everything else has a conservative
//! default.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";

/// Cutoff used when none is configured: far enough back to cover any
/// channel's full history.
pub const DEFAULT_CUTOFF: &str = "2000-01-01T00:00:00Z";

pub const DEFAULT_WORKERS: usize = 1;

/// Hard cap on the channel worker pool. The politeness delay already
/// bounds per-worker throughput; more threads than this just burns
/// quota faster.
pub const MAX_WORKERS: usize = 4;

/// Fully resolved settings for one harvest run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub output_root: PathBuf,
    pub api_key: String,
    pub cutoff: DateTime<Utc>,
    pub dev_mode: bool,
    pub workers: usize,
}

/// Values a binary wants to force regardless of file or environment.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub output_root: Option<PathBuf>,
    pub api_key: Option<String>,
    pub cutoff: Option<DateTime<Utc>>,
    pub dev_mode: Option<bool>,
    pub workers: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn load_run_settings() -> Result<RunSettings> {
    resolve_run_settings(RunOverrides::default())
}

pub fn resolve_run_settings(overrides: RunOverrides) -> Result<RunSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_run_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_run_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RunSettings> {
    build_run_settings_with_overrides(file_vars, env_lookup, RunOverrides::default())
}

fn build_run_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RunOverrides,
) -> Result<RunSettings> {
    let output_root = overrides
        .output_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("HARVEST_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("HARVEST_ROOT not set"))?;
    let api_key = overrides
        .api_key
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))?;
    let cutoff = match overrides.cutoff {
        Some(cutoff) => cutoff,
        None => match lookup_value("CUTOFF_DATE", file_vars, &env_lookup) {
            Some(raw) => parse_cutoff(&raw)
                .with_context(|| format!("CUTOFF_DATE value '{raw}' is not a date"))?,
            None => parse_cutoff(DEFAULT_CUTOFF).expect("default cutoff parses"),
        },
    };
    let dev_mode = overrides.dev_mode.unwrap_or_else(|| {
        lookup_value("DEV_MODE", file_vars, &env_lookup)
            .map(|value| parse_truthy(&value))
            .unwrap_or(false)
    });
    let workers = overrides
        .workers
        .or_else(|| {
            lookup_value("HARVEST_WORKERS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<usize>().ok())
        })
        .unwrap_or(DEFAULT_WORKERS)
        .clamp(1, MAX_WORKERS);

    Ok(RunSettings {
        output_root: PathBuf::from(output_root),
        api_key,
        cutoff,
        dev_mode,
        workers,
    })
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (taken as
/// midnight UTC). Offsets are normalized to UTC so every comparison in
/// the crawler happens in one timezone.
pub fn parse_cutoff(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(stamp.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }
    bail!("'{trimmed}' is neither an RFC 3339 timestamp nor YYYY-MM-DD");
}

fn parse_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Updates or appends a single env var inside the target file while
/// preserving unrelated lines and comments. Used to persist the API key
/// once so later runs don't need `--api-key`.
pub fn upsert_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }

    let raw = fs::read_to_string(path).unwrap_or_default();
    let mut lines = Vec::new();
    let mut updated = false;
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");

    for line in raw.lines() {
        let trimmed = line.trim_start();
        let indent_len = line.len() - trimmed.len();
        let indent = &line[..indent_len];
        let (prefix, rest) = if let Some(stripped) = trimmed.strip_prefix("export ") {
            ("export ", stripped)
        } else {
            ("", trimmed)
        };
        let Some((candidate, _)) = rest.split_once('=') else {
            lines.push(line.to_string());
            continue;
        };
        if candidate.trim() == key {
            lines.push(format!("{indent}{prefix}{key}=\"{escaped}\""));
            updated = true;
        } else {
            lines.push(line.to_string());
        }
    }

    if !updated {
        lines.push(format!("{key}=\"{escaped}\""));
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, lines.join("\n") + "\n")?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
