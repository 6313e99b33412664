#![forbid(unsafe_code)]

//! Turns raw channel references into uploads-playlist handles.
//!
//! Two shapes are accepted: `youtube.com/user/<name>` (legacy
//! usernames, resolved through one `channels.list` lookup) and
//! `youtube.com/channel/<id>` (already canonical). The resulting
//! channel id becomes the "all uploads" playlist handle by swapping its
//! first two characters for `UU` — an API quirk, but a stable one.

use std::thread;

use anyhow::Result;

use crate::api::{Outcome, VideoApi};
use crate::error::HarvestError;
use crate::signal::AbortSignal;

/// Path segments that name a channel tab rather than the channel
/// itself. They show up when references are copy-pasted from a browser.
const TAB_SUFFIXES: &[&str] = &[
    "videos",
    "shorts",
    "streams",
    "playlists",
    "community",
    "featured",
    "about",
];

#[derive(Debug, PartialEq, Eq)]
enum RefKind<'a> {
    User(&'a str),
    Channel(&'a str),
}

/// Resolves a channel reference to its uploads-playlist handle.
///
/// User-style references cost one lookup call; channel-style references
/// resolve locally. Unrecognized shapes and unknown usernames abandon
/// the channel, not the run.
pub fn resolve(api: &impl VideoApi, signal: &AbortSignal, channel_url: &str) -> Result<String> {
    let channel_id = match reference_kind(channel_url)? {
        RefKind::Channel(id) => id.to_owned(),
        RefKind::User(name) => lookup_channel_id(api, signal, name)?,
    };
    Ok(uploads_handle(&channel_id))
}

fn reference_kind(channel_url: &str) -> Result<RefKind<'_>> {
    let trimmed = channel_url.trim();
    if trimmed.contains("youtube.com/user/") {
        Ok(RefKind::User(trailing_segment(trimmed)))
    } else if trimmed.contains("youtube.com/channel/") {
        Ok(RefKind::Channel(trailing_segment(trimmed)))
    } else {
        Err(HarvestError::UnrecognizedReference(trimmed.to_owned()).into())
    }
}

/// Last meaningful path segment: trailing slashes go, and one known tab
/// suffix (`/videos`, `/about`, …) is peeled off first.
fn trailing_segment(channel_url: &str) -> &str {
    let mut segments = channel_url.trim_end_matches('/').split('/');
    let mut last = segments.next_back().unwrap_or(channel_url);
    if TAB_SUFFIXES.contains(&last)
        && let Some(previous) = segments.next_back()
    {
        last = previous;
    }
    last
}

fn lookup_channel_id(api: &impl VideoApi, signal: &AbortSignal, username: &str) -> Result<String> {
    loop {
        signal.check()?;
        match api.channel_for_username(username) {
            Outcome::Ok(response) => {
                return match response.items.into_iter().next() {
                    Some(item) => Ok(item.id),
                    None => Err(HarvestError::UnresolvableReference(username.to_owned()).into()),
                };
            }
            Outcome::Retry(delay) => {
                eprintln!(
                    "  Warning: rate limited looking up '{}', retrying in {}s",
                    username,
                    delay.as_secs()
                );
                thread::sleep(delay);
            }
            Outcome::Abort(reason) => {
                return Err(HarvestError::QuotaExhausted(reason).into());
            }
            Outcome::Skip(reason) => {
                // A lost lookup leaves us with no channel id to work
                // with, which is indistinguishable from an unknown name.
                eprintln!("  Warning: lookup for '{username}' failed: {reason}");
                return Err(HarvestError::UnresolvableReference(username.to_owned()).into());
            }
        }
    }
}

/// `UCxxxx → UUxxxx`: the uploads playlist shares the channel id's tail
/// behind a different two-character prefix.
fn uploads_handle(channel_id: &str) -> String {
    format!("UU{}", channel_id.get(2..).unwrap_or_default())
}

/// Inverse of [`uploads_handle`], used when rebuilding a channel URL
/// from an on-disk playlist directory name.
pub fn channel_id_for_handle(playlist_id: &str) -> String {
    format!("UC{}", playlist_id.get(2..).unwrap_or_default())
}
