#![forbid(unsafe_code)]

//! Batched metadata retrieval for discovered video ids.
//!
//! Ids go out in `videos.list` calls of at most 50, and whatever comes
//! back becomes one [`MetadataRecord`] per returned item. Ids the
//! remote no longer knows (deleted or private since discovery) simply
//! produce no row. A lost batch costs its own records and nothing else.

use std::thread;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};

use crate::api::{BATCH_SIZE, Outcome, VideoApi, VideoItem};
use crate::error::HarvestError;
use crate::signal::AbortSignal;

/// One row of the final per-channel table. Field order here is the
/// column order of the result file.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataRecord {
    pub video_id: String,
    pub channel_title: String,
    pub channel_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub description: String,
    pub category_id: String,
    #[serde(serialize_with = "count_field")]
    pub view_count: Option<u64>,
    #[serde(serialize_with = "count_field")]
    pub comment_count: Option<u64>,
    #[serde(serialize_with = "count_field")]
    pub like_count: Option<u64>,
    #[serde(serialize_with = "count_field")]
    pub dislike_count: Option<u64>,
    pub thumbnail_url: String,
    pub collection_date: NaiveDate,
}

/// Statistics the remote withheld serialize as the literal `unknown`,
/// so downstream readers can tell "not reported" from zero.
fn count_field<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(count) => serializer.serialize_u64(*count),
        None => serializer.serialize_str("unknown"),
    }
}

/// Fetches metadata for `ids` in sequential batches.
///
/// Batches replay on rate limits, die quietly on `Skip` (their records
/// are lost, the next batch proceeds), and propagate quota exhaustion.
/// Inter-batch spacing comes from the client's politeness delay.
pub fn collect(
    api: &impl VideoApi,
    signal: &AbortSignal,
    ids: &[String],
    collection_date: NaiveDate,
) -> Result<Vec<MetadataRecord>> {
    let mut records = Vec::new();
    let total_batches = ids.len().div_ceil(BATCH_SIZE);

    'batches: for (index, batch) in ids.chunks(BATCH_SIZE).enumerate() {
        let response = loop {
            signal.check()?;
            match api.video_batch(batch) {
                Outcome::Ok(response) => break response,
                Outcome::Retry(delay) => {
                    eprintln!(
                        "  Warning: rate limited on batch {}/{}, retrying in {}s",
                        index + 1,
                        total_batches,
                        delay.as_secs()
                    );
                    thread::sleep(delay);
                }
                Outcome::Abort(reason) => {
                    return Err(HarvestError::QuotaExhausted(reason).into());
                }
                Outcome::Skip(reason) => {
                    eprintln!(
                        "  Warning: batch {}/{} lost ({reason}); {} ids dropped",
                        index + 1,
                        total_batches,
                        batch.len()
                    );
                    continue 'batches;
                }
            }
        };

        for item in response.items {
            records.push(build_record(item, collection_date));
        }
        println!(
            "[{}/{}] {} records collected",
            index + 1,
            total_batches,
            records.len()
        );
    }

    Ok(records)
}

/// Normalizes one raw API item. Every field is optional on the wire;
/// absence becomes an empty string (text) or `unknown` (counts) rather
/// than a failed record.
fn build_record(item: VideoItem, collection_date: NaiveDate) -> MetadataRecord {
    let snippet = item.snippet;
    let statistics = item.statistics;

    let text = |value: Option<String>| value.unwrap_or_default();
    let count = |value: &Option<String>| -> Option<u64> {
        value.as_deref().and_then(|raw| raw.parse().ok())
    };

    MetadataRecord {
        video_id: item.id,
        channel_title: text(snippet.as_ref().and_then(|s| s.channel_title.clone())),
        channel_id: text(snippet.as_ref().and_then(|s| s.channel_id.clone())),
        published_at: snippet.as_ref().and_then(|s| s.published_at),
        title: text(snippet.as_ref().and_then(|s| s.title.clone())),
        description: text(snippet.as_ref().and_then(|s| s.description.clone())),
        category_id: text(snippet.as_ref().and_then(|s| s.category_id.clone())),
        view_count: statistics.as_ref().and_then(|s| count(&s.view_count)),
        comment_count: statistics.as_ref().and_then(|s| count(&s.comment_count)),
        like_count: statistics.as_ref().and_then(|s| count(&s.like_count)),
        dislike_count: statistics.as_ref().and_then(|s| count(&s.dislike_count)),
        thumbnail_url: snippet
            .as_ref()
            .and_then(|s| s.thumbnails.as_ref())
            .and_then(|thumbs| thumbs.best_url())
            .unwrap_or_default()
            .to_owned(),
        collection_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ChannelListResponse, PlaylistItemsResponse, Thumbnail, Thumbnails, VideoListResponse,
        VideoSnippet, VideoStatistics,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 15).unwrap()
    }

    fn item(id: &str) -> VideoItem {
        VideoItem {
            id: id.to_owned(),
            snippet: Some(VideoSnippet {
                channel_id: Some("UCabc".into()),
                channel_title: Some("Some Channel".into()),
                title: Some(format!("Title {id}")),
                description: Some("line one\nline two".into()),
                category_id: Some("25".into()),
                published_at: None,
                thumbnails: Some(Thumbnails {
                    high: Some(Thumbnail {
                        url: format!("https://i/{id}.jpg"),
                    }),
                    medium: None,
                    fallback: None,
                }),
            }),
            statistics: Some(VideoStatistics {
                view_count: Some("100".into()),
                comment_count: Some("5".into()),
                like_count: Some("10".into()),
                dislike_count: None,
            }),
        }
    }

    fn batch_of(ids: &[&str]) -> Outcome<VideoListResponse> {
        Outcome::Ok(VideoListResponse {
            items: ids.iter().map(|id| item(id)).collect(),
        })
    }

    /// Batch-only fake recording the size of every requested batch.
    #[derive(Default)]
    struct ScriptedBatches {
        responses: Mutex<VecDeque<Outcome<VideoListResponse>>>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedBatches {
        fn with(responses: Vec<Outcome<VideoListResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }

        fn sizes(&self) -> Vec<usize> {
            self.batch_sizes.lock().clone()
        }
    }

    impl VideoApi for ScriptedBatches {
        fn channel_for_username(&self, _: &str) -> Outcome<ChannelListResponse> {
            panic!("collector must not resolve usernames");
        }

        fn playlist_page(&self, _: &str, _: Option<&str>) -> Outcome<PlaylistItemsResponse> {
            panic!("collector must not page listings");
        }

        fn video_batch(&self, ids: &[String]) -> Outcome<VideoListResponse> {
            self.batch_sizes.lock().push(ids.len());
            self.responses.lock().pop_front().expect("scripted batch")
        }
    }

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|n| format!("vid{n:03}")).collect()
    }

    #[test]
    fn ids_partition_into_api_sized_batches() {
        let api = ScriptedBatches::with(vec![batch_of(&[]), batch_of(&[]), batch_of(&[])]);
        collect(&api, &AbortSignal::new(), &ids(120), today()).unwrap();
        assert_eq!(api.sizes(), vec![50, 50, 20]);
    }

    #[test]
    fn missing_ids_are_dropped_without_error() {
        let requested = ids(50);
        let returned: Vec<&str> = requested[..48].iter().map(String::as_str).collect();
        let api = ScriptedBatches::with(vec![batch_of(&returned)]);
        let records = collect(&api, &AbortSignal::new(), &requested, today()).unwrap();
        assert_eq!(records.len(), 48);
    }

    #[test]
    fn skipped_batch_contributes_nothing_and_run_continues() {
        let api = ScriptedBatches::with(vec![
            Outcome::Skip("malformed request".into()),
            batch_of(&["vid050"]),
        ]);
        let records = collect(&api, &AbortSignal::new(), &ids(51), today()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].video_id, "vid050");
        assert_eq!(api.sizes(), vec![50, 1]);
    }

    #[test]
    fn rate_limited_batch_replays_identically() {
        let api = ScriptedBatches::with(vec![
            Outcome::Retry(Duration::from_millis(1)),
            batch_of(&["vid000"]),
        ]);
        let records = collect(&api, &AbortSignal::new(), &ids(1), today()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(api.sizes(), vec![1, 1]);
    }

    #[test]
    fn quota_abort_stops_collection() {
        let api = ScriptedBatches::with(vec![Outcome::Abort("daily limit".into())]);
        let err = collect(&api, &AbortSignal::new(), &ids(1), today()).unwrap_err();
        assert!(err.downcast_ref::<HarvestError>().unwrap().is_run_fatal());
    }

    #[test]
    fn absent_statistics_become_unknown() {
        let mut sparse = item("bare");
        sparse.statistics = None;
        sparse.snippet = None;
        let record = build_record(sparse, today());
        assert_eq!(record.view_count, None);
        assert_eq!(record.title, "");

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer.serialize(&record).unwrap();
        let raw = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let data_line = raw.lines().nth(1).unwrap();
        let fields: Vec<&str> = data_line.split('\t').collect();
        // view/comment/like/dislike all unreported.
        assert_eq!(&fields[7..11], &["unknown"; 4]);
    }

    #[test]
    fn unparseable_counts_read_as_unknown() {
        let mut odd = item("odd");
        odd.statistics = Some(VideoStatistics {
            view_count: Some("12x".into()),
            comment_count: Some("7".into()),
            like_count: None,
            dislike_count: None,
        });
        let record = build_record(odd, today());
        assert_eq!(record.view_count, None);
        assert_eq!(record.comment_count, Some(7));
    }

    #[test]
    fn records_carry_the_collection_date() {
        let record = build_record(item("vid"), today());
        assert_eq!(record.collection_date, today());
        assert_eq!(record.channel_title, "Some Channel");
        assert_eq!(record.thumbnail_url, "https://i/vid.jpg");
    }
}
