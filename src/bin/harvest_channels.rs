#![forbid(unsafe_code)]

//! Command-line harvester: reads a list of channel references and runs
//! each one through resolve → discover → collect, writing one directory
//! of tabular files per channel under the output root.
//!
//! Interrupted runs are cheap to repeat: finished channels are skipped
//! outright and half-finished ones resume from their checkpoint.

use anyhow::{Context, Result, bail};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tubecensus::api::ApiClient;
use tubecensus::config::{
    DEFAULT_ENV_PATH, RunOverrides, parse_cutoff, resolve_run_settings, upsert_env_value,
};
use tubecensus::orchestrator::harvest_all;
use tubecensus::security::ensure_not_root;
use tubecensus::signal::AbortSignal;
use tubecensus::store::CatalogStore;

#[derive(Debug, Clone, Default)]
struct HarvesterArgs {
    input_file: Option<PathBuf>,
    channel: Option<String>,
    overrides: RunOverrides,
    save_key: bool,
}

impl HarvesterArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--output-root=") {
                parsed.overrides.output_root = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--api-key=") {
                parsed.overrides.api_key = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--cutoff=") {
                parsed.overrides.cutoff = Some(parse_cutoff(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--workers=") {
                parsed.overrides.workers = Some(Self::parse_workers(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                parsed.overrides.env_path = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--channel=") {
                Self::set_channel(&mut parsed.channel, value.to_string())?;
                continue;
            }

            match arg.as_str() {
                "--output-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--output-root requires a value"))?;
                    parsed.overrides.output_root = Some(PathBuf::from(value));
                }
                "--api-key" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--api-key requires a value"))?;
                    parsed.overrides.api_key = Some(value);
                }
                "--cutoff" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--cutoff requires a value"))?;
                    parsed.overrides.cutoff = Some(parse_cutoff(&value)?);
                }
                "--workers" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--workers requires a value"))?;
                    parsed.overrides.workers = Some(Self::parse_workers(&value)?);
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--env-file requires a value"))?;
                    parsed.overrides.env_path = Some(PathBuf::from(value));
                }
                "--channel" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--channel requires a value"))?;
                    Self::set_channel(&mut parsed.channel, value)?;
                }
                "--dev" => {
                    parsed.overrides.dev_mode = Some(true);
                }
                "--save-key" => {
                    parsed.save_key = true;
                }
                _ if arg.starts_with('-') => {
                    bail!("unknown argument: {arg}");
                }
                _ => {
                    if parsed.input_file.is_some() {
                        bail!("channel list file specified multiple times");
                    }
                    parsed.input_file = Some(PathBuf::from(arg));
                }
            }
        }

        if parsed.input_file.is_some() && parsed.channel.is_some() {
            bail!("cannot provide both a channel list file and --channel");
        }
        if parsed.input_file.is_none() && parsed.channel.is_none() {
            bail!(
                "Usage: harvest_channels [--output-root <path>] [--api-key <key>] [--cutoff <date>] [--workers <n>] [--dev] [--save-key] <channel_list_file>\n       harvest_channels [options] --channel <channel_url>"
            );
        }
        if parsed.save_key && parsed.overrides.api_key.is_none() {
            bail!("--save-key requires --api-key");
        }

        Ok(parsed)
    }

    fn set_channel(target: &mut Option<String>, value: String) -> Result<()> {
        if target.is_some() {
            bail!("--channel specified multiple times");
        }
        *target = Some(value);
        Ok(())
    }

    fn parse_workers(value: &str) -> Result<usize> {
        value
            .parse::<usize>()
            .with_context(|| format!("--workers value '{value}' is not a number"))
    }
}

/// One channel reference per line. Blank lines and `#` comments are
/// ignored, as is a leading `users` header (the spreadsheet-export
/// convention for these lists).
fn load_channel_list(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading channel list {}", path.display()))?;
    let mut channels = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if index == 0 && trimmed.eq_ignore_ascii_case("users") {
            continue;
        }
        channels.push(trimmed.to_owned());
    }
    Ok(channels)
}

fn main() -> Result<()> {
    ensure_not_root("harvest_channels")?;

    let args = HarvesterArgs::parse()?;
    let env_path = args
        .overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let settings = resolve_run_settings(args.overrides.clone())?;

    if args.save_key {
        upsert_env_value(&env_path, "YOUTUBE_API_KEY", &settings.api_key)?;
        println!("Saved API key to {}", env_path.display());
    }

    let channels = match (&args.input_file, &args.channel) {
        (Some(path), None) => load_channel_list(path)?,
        (None, Some(url)) => vec![url.clone()],
        _ => unreachable!("argument validation enforces exactly one source"),
    };
    if channels.is_empty() {
        println!("Channel list is empty; nothing to do.");
        return Ok(());
    }

    println!("===================================");
    println!("YouTube Catalog Harvester");
    println!("===================================");
    println!("Channels: {}", channels.len());
    println!("Output root: {}", settings.output_root.display());
    println!("Cutoff: {}", settings.cutoff.to_rfc3339());
    println!("Workers: {}", settings.workers);
    if settings.dev_mode {
        println!("Dev mode: page and channel caps active");
    }
    println!();

    let api = ApiClient::new(&settings.api_key);
    let store = CatalogStore::new(&settings.output_root);
    let signal = AbortSignal::new();
    let summary = harvest_all(
        &api,
        &store,
        &signal,
        &channels,
        settings.cutoff,
        settings.dev_mode,
        settings.workers,
    );

    println!();
    println!("===================================");
    println!("Run finished");
    println!("===================================");
    println!("Completed: {}", summary.completed);
    println!("Skipped (already complete): {}", summary.skipped);
    println!("Abandoned: {}", summary.abandoned);

    if let Some(reason) = summary.abort_reason {
        bail!("run aborted early: {reason}");
    }
    Ok(())
}
