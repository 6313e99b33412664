#![forbid(unsafe_code)]

//! Shared guards for the tubecensus binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The harvester writes
/// large trees under the output root; running it unprivileged keeps
/// ownership sane and stops typos in `HARVEST_ROOT` from scribbling
/// over system directories.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Masks the `key=` query parameter before a request URL hits a log
/// line. Every harvester URL carries the quota key, and warnings quote
/// the failing URL, so this is the one place the key gets scrubbed.
pub fn redact_key(url: &str) -> String {
    let Some(start) = url.find("key=") else {
        return url.to_owned();
    };
    // Keep everything up to the value, replace the value itself.
    let value_start = start + "key=".len();
    let value_end = url[value_start..]
        .find('&')
        .map(|offset| value_start + offset)
        .unwrap_or(url.len());
    let mut masked = String::with_capacity(url.len());
    masked.push_str(&url[..value_start]);
    masked.push_str("REDACTED");
    masked.push_str(&url[value_end..]);
    masked
}
