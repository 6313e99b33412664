#![forbid(unsafe_code)]

//! On-disk layout and persistence for harvested channels.
//!
//! Each channel owns one directory named after its uploads playlist:
//!
//! ```text
//! <output root>/
//!   UUxxxxxxxx/
//!     video_index.csv      discovery checkpoint (id, publish time)
//!     video_metadata.tsv   final record table = completion marker
//! ```
//!
//! All writes go to a temp file in the same directory and rename into
//! place, so a reader never observes a partial checkpoint or result.
//! This module is the only code that touches these paths; everything
//! else asks [`CatalogStore::status`] once and works from that.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::collect::MetadataRecord;
use crate::discovery::DiscoveryEntry;

pub const CHECKPOINT_FILE: &str = "video_index.csv";
pub const RESULT_FILE: &str = "video_metadata.tsv";

/// Where a channel stands at the start of a run. Derived once per
/// channel; never re-checked mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Nothing on disk: discover, then collect.
    Pending,
    /// Checkpoint present, no result: resume straight at collection.
    Discovered,
    /// Result present: permanently done, skip without any remote call.
    Complete,
}

/// Filesystem owner for checkpoints and results under one output root.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn channel_dir(&self, playlist_id: &str) -> PathBuf {
        self.root.join(playlist_id)
    }

    pub fn checkpoint_path(&self, playlist_id: &str) -> PathBuf {
        self.channel_dir(playlist_id).join(CHECKPOINT_FILE)
    }

    pub fn result_path(&self, playlist_id: &str) -> PathBuf {
        self.channel_dir(playlist_id).join(RESULT_FILE)
    }

    /// The three-state marker: result beats checkpoint beats nothing.
    pub fn status(&self, playlist_id: &str) -> ChannelStatus {
        if self.result_path(playlist_id).exists() {
            ChannelStatus::Complete
        } else if self.checkpoint_path(playlist_id).exists() {
            ChannelStatus::Discovered
        } else {
            ChannelStatus::Pending
        }
    }

    /// Reads the full persisted discovery log, timestamps normalized to
    /// UTC. Cutoff filtering is the caller's job.
    pub fn load_index(&self, playlist_id: &str) -> Result<Vec<DiscoveryEntry>> {
        let path = self.checkpoint_path(playlist_id);
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("opening checkpoint {}", path.display()))?;
        let mut entries = Vec::new();
        for row in reader.deserialize() {
            let entry: DiscoveryEntry =
                row.with_context(|| format!("parsing checkpoint {}", path.display()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Persists a fresh discovery log. A channel gets exactly one
    /// discovery pass per checkpoint lifetime, so overwriting an
    /// existing checkpoint is a logic error, not a merge.
    pub fn save_index(&self, playlist_id: &str, entries: &[DiscoveryEntry]) -> Result<()> {
        let path = self.checkpoint_path(playlist_id);
        if path.exists() {
            bail!("checkpoint already exists at {}", path.display());
        }
        self.write_table(&path, b',', entries)
    }

    /// Persists the final record table; its existence marks the channel
    /// complete.
    pub fn save_metadata(&self, playlist_id: &str, records: &[MetadataRecord]) -> Result<()> {
        let path = self.result_path(playlist_id);
        self.write_table(&path, b'\t', records)
    }

    fn write_table<T: serde::Serialize>(
        &self,
        path: &Path,
        delimiter: u8,
        rows: &[T],
    ) -> Result<()> {
        let dir = path
            .parent()
            .context("table path has no parent directory")?;
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let tmp_path = dir.join(format!(
            "{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("writing {}", tmp_path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing {}", tmp_path.display()))?;
        drop(writer);

        fs::rename(&tmp_path, path)
            .with_context(|| format!("finalizing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, Utc};
    use tempfile::tempdir;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_log() -> Vec<DiscoveryEntry> {
        vec![
            DiscoveryEntry {
                video_id: "v1".into(),
                published_at: ts("2021-03-01T10:30:00Z"),
            },
            DiscoveryEntry {
                video_id: "v2".into(),
                published_at: ts("2021-02-01T08:00:00Z"),
            },
            DiscoveryEntry {
                video_id: "v3".into(),
                published_at: ts("2020-12-01T00:00:00Z"),
            },
        ]
    }

    #[test]
    fn save_then_load_round_trips_in_order() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        let log = sample_log();
        store.save_index("UUabc", &log).unwrap();
        let loaded = store.load_index("UUabc").unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn checkpoint_has_stable_columns_and_utc_stamps() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        store.save_index("UUabc", &sample_log()).unwrap();
        let raw = std::fs::read_to_string(store.checkpoint_path("UUabc")).unwrap();
        let mut lines = raw.lines();
        assert_eq!(lines.next(), Some("video_id,published_at"));
        let first = lines.next().unwrap();
        assert!(first.starts_with("v1,"));
        assert!(first.ends_with("+00:00") || first.ends_with('Z'), "{first}");
    }

    #[test]
    fn load_normalizes_offsets_to_utc() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        let dir = store.channel_dir("UUabc");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(CHECKPOINT_FILE),
            "video_id,published_at\nv1,2021-01-01T02:00:00+02:00\n",
        )
        .unwrap();
        let loaded = store.load_index("UUabc").unwrap();
        assert_eq!(loaded[0].published_at, ts("2021-01-01T00:00:00Z"));
    }

    #[test]
    fn save_refuses_to_overwrite_a_checkpoint() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        store.save_index("UUabc", &sample_log()).unwrap();
        let err = store.save_index("UUabc", &sample_log()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn saves_leave_no_temp_files_behind() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        store.save_index("UUabc", &sample_log()).unwrap();
        store.save_metadata("UUabc", &[]).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.channel_dir("UUabc"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn status_walks_pending_discovered_complete() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        assert_eq!(store.status("UUabc"), ChannelStatus::Pending);
        store.save_index("UUabc", &sample_log()).unwrap();
        assert_eq!(store.status("UUabc"), ChannelStatus::Discovered);
        store.save_metadata("UUabc", &[]).unwrap();
        assert_eq!(store.status("UUabc"), ChannelStatus::Complete);
    }

    #[test]
    fn load_without_checkpoint_is_an_error() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        assert!(store.load_index("UUmissing").is_err());
    }

    #[test]
    fn result_table_is_tab_separated_with_quoted_text() {
        let temp = tempdir().unwrap();
        let store = CatalogStore::new(temp.path());
        let record = MetadataRecord {
            video_id: "v1".into(),
            channel_title: "A Channel".into(),
            channel_id: "UCabc".into(),
            published_at: Some(ts("2021-03-01T10:30:00Z")),
            title: "A title\twith a tab".into(),
            description: "multi\nline".into(),
            category_id: "25".into(),
            view_count: Some(100),
            comment_count: None,
            like_count: Some(10),
            dislike_count: None,
            thumbnail_url: "https://i/v1.jpg".into(),
            collection_date: NaiveDate::from_ymd_opt(2021, 6, 15).unwrap(),
        };
        store.save_metadata("UUabc", &[record]).unwrap();
        let raw = std::fs::read_to_string(store.result_path("UUabc")).unwrap();
        let header = raw.lines().next().unwrap();
        assert_eq!(
            header,
            "video_id\tchannel_title\tchannel_id\tpublished_at\ttitle\tdescription\tcategory_id\tview_count\tcomment_count\tlike_count\tdislike_count\tthumbnail_url\tcollection_date"
        );
        assert!(raw.contains("unknown"));
        // Embedded tab and newline survive via quoting.
        assert!(raw.contains("\"A title\twith a tab\""));
        assert!(raw.contains("\"multi\nline\""));
    }
}
