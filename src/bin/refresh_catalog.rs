#![forbid(unsafe_code)]

//! Helper binary that finds interrupted harvests on disk and re-runs
//! the harvester for each. Acts like a nightly cron job: any channel
//! with a checkpoint but no result table picks up where it left off.

use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
#[cfg(test)]
use std::sync::Mutex;
use tubecensus::config::{RunOverrides, resolve_run_settings};
use tubecensus::resolver::channel_id_for_handle;
use tubecensus::security::ensure_not_root;
use tubecensus::store::{CHECKPOINT_FILE, RESULT_FILE};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
struct RefreshArgs {
    output_root: PathBuf,
}

impl RefreshArgs {
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
        let mut output_root_override: Option<PathBuf> = None;
        let mut env_path_override: Option<PathBuf> = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--output-root=") {
                output_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env-file=") {
                env_path_override = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--output-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--output-root requires a value"))?;
                    output_root_override = Some(PathBuf::from(value));
                }
                "--env-file" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--env-file requires a value"))?;
                    env_path_override = Some(PathBuf::from(value));
                }
                _ => {
                    bail!("unknown argument: {arg}");
                }
            }
        }

        let settings = resolve_run_settings(RunOverrides {
            output_root: output_root_override.clone(),
            env_path: env_path_override,
            ..RunOverrides::default()
        })?;
        let output_root = output_root_override.unwrap_or(settings.output_root);

        Ok(Self { output_root })
    }
}

/// Re-runs the harvester for every interrupted channel found on disk.
fn main() -> Result<()> {
    ensure_not_root("refresh_catalog")?;

    let RefreshArgs { output_root } = RefreshArgs::parse()?;

    println!("Output root: {}", output_root.display());

    let unfinished = find_unfinished_channels(&output_root)?;
    if unfinished.is_empty() {
        println!(
            "No interrupted channels found in {}.",
            output_root.display()
        );
        return Ok(());
    }

    let harvester = find_harvester_executable()?;

    println!("Found {} channel(s) to finish.", unfinished.len());
    println!("Channels queued for refresh:");
    for playlist_id in &unfinished {
        println!("  - {}", playlist_id);
    }

    for (index, playlist_id) in unfinished.iter().enumerate() {
        let current = index + 1;
        let channel_url = channel_url_for_playlist(playlist_id);
        println!();
        println!(
            "[{}/{}] Resuming channel: {}",
            current,
            unfinished.len(),
            channel_url
        );

        match Command::new(&harvester)
            .arg("--output-root")
            .arg(&output_root)
            .arg("--channel")
            .arg(&channel_url)
            .status()
        {
            Ok(status) if status.success() => {
                println!("  Finished {}", playlist_id);
            }
            Ok(status) => {
                eprintln!(
                    "  Warning: harvester exited with status {} for {}",
                    status, playlist_id
                );
            }
            Err(err) => {
                eprintln!(
                    "  Warning: failed to run harvester for {}: {}",
                    playlist_id, err
                );
            }
        }
    }

    println!();
    println!("All resumable channels processed.");

    Ok(())
}

/// Walks the output root for channel directories holding a checkpoint
/// but no result table. Returns playlist ids in sorted order.
fn find_unfinished_channels(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut unfinished = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        if entry.file_name().to_string_lossy() != CHECKPOINT_FILE {
            continue;
        }
        let Some(channel_dir) = entry.path().parent() else {
            continue;
        };
        if channel_dir.join(RESULT_FILE).exists() {
            continue;
        }
        let Some(playlist_id) = channel_dir.file_name().map(|name| name.to_string_lossy()) else {
            continue;
        };
        unfinished.push(playlist_id.into_owned());
    }

    unfinished.sort();
    Ok(unfinished)
}

/// A checkpoint directory is named after the uploads playlist; mapping
/// it back to a channel URL is the prefix transform run in reverse.
fn channel_url_for_playlist(playlist_id: &str) -> String {
    format!(
        "https://www.youtube.com/channel/{}",
        channel_id_for_handle(playlist_id)
    )
}

/// Finds the `harvest_channels` executable either via Cargo's env var
/// or by looking next to the current binary (assuming `cargo install` /
/// `cargo build`).
#[cfg(test)]
static HARVESTER_STUB: Mutex<Option<PathBuf>> = Mutex::new(None);

#[cfg(test)]
fn set_harvester_stub(path: PathBuf) {
    *HARVESTER_STUB.lock().unwrap() = Some(path);
}

fn find_harvester_executable() -> Result<PathBuf> {
    #[cfg(test)]
    {
        if let Some(path) = HARVESTER_STUB.lock().unwrap().clone()
            && path.exists()
        {
            return Ok(path);
        }
    }

    if let Ok(path) = env::var("CARGO_BIN_EXE_harvest_channels") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    let mut sibling = env::current_exe().context("locating refresh_catalog executable")?;
    sibling.set_file_name("harvest_channels");
    if sibling.exists() {
        return Ok(sibling);
    }

    bail!("harvest_channels binary not found. Build it with `cargo build --bin harvest_channels`.");
}
