#![forbid(unsafe_code)]

//! Per-channel sequencing and the optional worker pool.
//!
//! One channel walks `resolve → (discover + checkpoint | resume) →
//! collect → persist result`. Failures are contained here: anything
//! short of quota exhaustion abandons the one channel and the run moves
//! on; quota exhaustion flips the shared abort signal and the remaining
//! queue is never started.

use std::collections::{HashSet, VecDeque};
use std::thread;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::api::VideoApi;
use crate::collect;
use crate::discovery;
use crate::error::HarvestError;
use crate::resolver;
use crate::signal::AbortSignal;
use crate::store::{CatalogStore, ChannelStatus};

/// Channel cap applied in development mode.
pub const DEV_MAX_CHANNELS: usize = 3;

/// How one channel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Harvested (fresh or resumed) and result written.
    Completed,
    /// Result already on disk; nothing was fetched.
    AlreadyComplete,
    /// Abandoned after a per-channel failure; others unaffected.
    Abandoned,
}

/// Tallies for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub abandoned: usize,
    pub abort_reason: Option<String>,
}

/// Runs one channel to a terminal state. The per-channel error
/// boundary: only quota exhaustion escapes as `Err`.
pub fn run_channel(
    api: &impl VideoApi,
    store: &CatalogStore,
    signal: &AbortSignal,
    channel_url: &str,
    cutoff: DateTime<Utc>,
    dev_mode: bool,
) -> Result<ChannelOutcome> {
    match harvest_channel(api, store, signal, channel_url, cutoff, dev_mode) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if err
                .downcast_ref::<HarvestError>()
                .is_some_and(HarvestError::is_run_fatal)
            {
                return Err(err);
            }
            eprintln!("  Warning: abandoning {channel_url}: {err:#}");
            Ok(ChannelOutcome::Abandoned)
        }
    }
}

fn harvest_channel(
    api: &impl VideoApi,
    store: &CatalogStore,
    signal: &AbortSignal,
    channel_url: &str,
    cutoff: DateTime<Utc>,
    dev_mode: bool,
) -> Result<ChannelOutcome> {
    println!("Channel: {channel_url}");
    let playlist_id = resolver::resolve(api, signal, channel_url)?;

    // The tri-state marker is read exactly once; every later step works
    // from this decision, not from fresh filesystem probes.
    let log = match store.status(&playlist_id) {
        ChannelStatus::Complete => {
            println!("  {playlist_id}: already complete, skipping");
            return Ok(ChannelOutcome::AlreadyComplete);
        }
        ChannelStatus::Discovered => {
            println!("  {playlist_id}: resuming from checkpoint");
            store.load_index(&playlist_id)?
        }
        ChannelStatus::Pending => {
            println!("  {playlist_id}: discovering uploads");
            let log = discovery::discover(api, signal, &playlist_id, cutoff, dev_mode)?;
            store.save_index(&playlist_id, &log)?;
            log
        }
    };

    let survivors = surviving_ids(&log, cutoff);
    println!(
        "  {playlist_id}: collecting {} of {} discovered videos",
        survivors.len(),
        log.len()
    );

    let records = collect::collect(api, signal, &survivors, Utc::now().date_naive())?;
    store.save_metadata(&playlist_id, &records)?;
    println!("  {playlist_id}: complete, {} records", records.len());
    Ok(ChannelOutcome::Completed)
}

/// Entries at or past the cutoff, first occurrence per id, log order
/// preserved. The checkpoint keeps the one pre-cutoff entry that ended
/// discovery; this is where it drops out.
fn surviving_ids(log: &[discovery::DiscoveryEntry], cutoff: DateTime<Utc>) -> Vec<String> {
    let mut seen = HashSet::new();
    log.iter()
        .filter(|entry| entry.published_at >= cutoff)
        .filter(|entry| seen.insert(entry.video_id.as_str()))
        .map(|entry| entry.video_id.clone())
        .collect()
}

/// Drains the channel list with `workers` threads (1 = the sequential
/// baseline). Channels partition the filesystem between workers, so the
/// only shared state is the abort signal and the queue itself.
pub fn harvest_all(
    api: &(impl VideoApi + Sync),
    store: &CatalogStore,
    signal: &AbortSignal,
    channels: &[String],
    cutoff: DateTime<Utc>,
    dev_mode: bool,
    workers: usize,
) -> RunSummary {
    let mut channels = channels;
    if dev_mode && channels.len() > DEV_MAX_CHANNELS {
        println!(
            ">> dev mode: limiting run to {DEV_MAX_CHANNELS} of {} channels",
            channels.len()
        );
        channels = &channels[..DEV_MAX_CHANNELS];
    }

    let queue: Mutex<VecDeque<&String>> = Mutex::new(channels.iter().collect());
    let completed = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);
    let abandoned = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| {
                loop {
                    if signal.is_aborted() {
                        break;
                    }
                    let Some(channel_url) = queue.lock().pop_front() else {
                        break;
                    };
                    match run_channel(api, store, signal, channel_url, cutoff, dev_mode) {
                        Ok(ChannelOutcome::Completed) => {
                            completed.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(ChannelOutcome::AlreadyComplete) => {
                            skipped.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(ChannelOutcome::Abandoned) => {
                            abandoned.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            // Everything already persisted stays; we
                            // just stop issuing remote calls.
                            signal.abort(&format!("{err:#}"));
                            eprintln!("Aborting run: {err:#}");
                            break;
                        }
                    }
                }
            });
        }
    });

    RunSummary {
        completed: completed.into_inner(),
        skipped: skipped.into_inner(),
        abandoned: abandoned.into_inner(),
        abort_reason: signal.reason(),
    }
}
