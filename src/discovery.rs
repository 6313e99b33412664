#![forbid(unsafe_code)]

//! Paginated discovery of a channel's upload listing.
//!
//! One crawl walks the uploads playlist newest-first, emitting
//! `(video id, publish timestamp)` pairs until history runs out or the
//! configured cutoff is crossed. The result becomes the channel's
//! checkpoint; a channel is crawled once per checkpoint lifetime.

use std::thread;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{Outcome, VideoApi};
use crate::error::HarvestError;
use crate::signal::AbortSignal;

/// Page cap applied in development mode so trial runs stay cheap.
pub const DEV_MAX_PAGES: usize = 2;

/// One discovered listing item. Row order in the checkpoint file is
/// exactly the order of discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub video_id: String,
    pub published_at: DateTime<Utc>,
}

/// Crawls the uploads playlist `playlist_id` down to `cutoff`.
///
/// Precondition: the remote listing is assumed strictly
/// reverse-chronological. The inclusive-cutoff early stop relies on it;
/// if the API ever returned out-of-order pages, entries past the cutoff
/// could be missed.
///
/// The first entry strictly earlier than `cutoff` is still emitted
/// (inclusive cutoff), then the crawl stops. Outcome handling per page:
/// rate limits sleep and replay the identical request; a lost page ends
/// the crawl with what was accumulated, because the next continuation
/// cursor was inside the lost body; quota exhaustion aborts the run.
pub fn discover(
    api: &impl VideoApi,
    signal: &AbortSignal,
    playlist_id: &str,
    cutoff: DateTime<Utc>,
    dev_mode: bool,
) -> Result<Vec<DiscoveryEntry>> {
    let mut entries: Vec<DiscoveryEntry> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        signal.check()?;
        let page = match api.playlist_page(playlist_id, cursor.as_deref()) {
            Outcome::Ok(page) => page,
            Outcome::Retry(delay) => {
                eprintln!(
                    "  Warning: rate limited listing {}, retrying in {}s",
                    playlist_id,
                    delay.as_secs()
                );
                thread::sleep(delay);
                continue;
            }
            Outcome::Abort(reason) => {
                return Err(HarvestError::QuotaExhausted(reason).into());
            }
            Outcome::Skip(reason) => {
                if entries.is_empty() {
                    eprintln!("  Warning: first listing page for {playlist_id} lost: {reason}");
                    return Err(HarvestError::EmptyCollection(playlist_id.to_owned()).into());
                }
                eprintln!(
                    "  Warning: listing page for {playlist_id} lost ({reason}); keeping {} entries discovered so far",
                    entries.len()
                );
                break;
            }
        };
        pages += 1;

        if pages == 1 && page.items.is_empty() {
            return Err(HarvestError::EmptyCollection(playlist_id.to_owned()).into());
        }

        let mut crossed_cutoff = false;
        for item in &page.items {
            let Some(video_id) = item.video_id() else {
                continue;
            };
            let Some(published_at) = item.published_at() else {
                continue;
            };
            entries.push(DiscoveryEntry {
                video_id: video_id.to_owned(),
                published_at,
            });
            if published_at < cutoff {
                crossed_cutoff = true;
                break;
            }
        }
        println!(">> {} videos discovered", entries.len());

        if crossed_cutoff {
            break;
        }
        match page.next_page_token {
            Some(token) => cursor = Some(token),
            None => break,
        }
        if dev_mode && pages >= DEV_MAX_PAGES {
            println!(">> dev mode: stopping discovery after {pages} pages");
            break;
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ChannelListResponse, PlaylistItem, PlaylistItemSnippet, PlaylistItemsResponse, ResourceId,
        VideoListResponse,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn page(items: &[(&str, &str)], next: Option<&str>) -> Outcome<PlaylistItemsResponse> {
        Outcome::Ok(PlaylistItemsResponse {
            items: items
                .iter()
                .map(|(id, stamp)| PlaylistItem {
                    snippet: Some(PlaylistItemSnippet {
                        resource_id: Some(ResourceId {
                            video_id: Some((*id).to_owned()),
                        }),
                        published_at: Some(ts(stamp)),
                    }),
                    content_details: None,
                })
                .collect(),
            next_page_token: next.map(str::to_owned),
        })
    }

    /// Listing-only fake recording the cursor used for each request.
    #[derive(Default)]
    struct ScriptedListing {
        responses: Mutex<VecDeque<Outcome<PlaylistItemsResponse>>>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedListing {
        fn with(responses: Vec<Outcome<PlaylistItemsResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }

        fn seen_cursors(&self) -> Vec<Option<String>> {
            self.cursors.lock().clone()
        }
    }

    impl VideoApi for ScriptedListing {
        fn channel_for_username(&self, _: &str) -> Outcome<ChannelListResponse> {
            panic!("crawler must not resolve usernames");
        }

        fn playlist_page(&self, _: &str, cursor: Option<&str>) -> Outcome<PlaylistItemsResponse> {
            self.cursors.lock().push(cursor.map(str::to_owned));
            self.responses.lock().pop_front().expect("scripted page")
        }

        fn video_batch(&self, _: &[String]) -> Outcome<VideoListResponse> {
            panic!("crawler must not fetch videos");
        }
    }

    #[test]
    fn cutoff_scenario_keeps_first_sub_cutoff_entry_only() {
        let api = ScriptedListing::with(vec![
            page(
                &[("v1", "2021-03-01T00:00:00Z"), ("v2", "2021-02-01T00:00:00Z")],
                Some("p2"),
            ),
            page(
                &[("v3", "2020-12-01T00:00:00Z"), ("v4", "2020-11-01T00:00:00Z")],
                Some("p3"),
            ),
        ]);
        let cutoff = ts("2021-01-01T00:00:00Z");
        let log = discover(&api, &AbortSignal::new(), "UUabc", cutoff, false).unwrap();

        let ids: Vec<&str> = log.iter().map(|entry| entry.video_id.as_str()).collect();
        assert_eq!(ids, ["v1", "v2", "v3"]);
        // Two pages requested, never the third.
        assert_eq!(
            api.seen_cursors(),
            vec![None, Some("p2".to_owned())]
        );
        // Reverse-chronological in, non-increasing out.
        assert!(
            log.windows(2)
                .all(|pair| pair[0].published_at >= pair[1].published_at)
        );
    }

    #[test]
    fn crawl_ends_when_history_runs_out() {
        let api = ScriptedListing::with(vec![
            page(&[("v1", "2021-03-01T00:00:00Z")], Some("p2")),
            page(&[("v2", "2021-02-01T00:00:00Z")], None),
        ]);
        let log = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn empty_first_page_is_an_empty_collection() {
        let api = ScriptedListing::with(vec![page(&[], None)]);
        let err = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarvestError>(),
            Some(HarvestError::EmptyCollection(playlist)) if playlist == "UUabc"
        ));
    }

    #[test]
    fn rate_limit_replays_the_same_cursor() {
        let api = ScriptedListing::with(vec![
            Outcome::Retry(Duration::from_millis(1)),
            page(&[("v1", "2021-03-01T00:00:00Z")], None),
        ]);
        let log = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(api.seen_cursors(), vec![None, None]);
    }

    #[test]
    fn lost_page_keeps_what_was_accumulated() {
        let api = ScriptedListing::with(vec![
            page(&[("v1", "2021-03-01T00:00:00Z")], Some("p2")),
            Outcome::Skip("decode error".into()),
        ]);
        let log = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].video_id, "v1");
    }

    #[test]
    fn lost_first_page_reads_as_empty_collection() {
        let api = ScriptedListing::with(vec![Outcome::Skip("transport".into())]);
        let err = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarvestError>(),
            Some(HarvestError::EmptyCollection(_))
        ));
    }

    #[test]
    fn quota_abort_propagates() {
        let api = ScriptedListing::with(vec![Outcome::Abort("daily limit".into())]);
        let err = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<HarvestError>().unwrap().is_run_fatal());
    }

    #[test]
    fn dev_mode_caps_page_count() {
        let api = ScriptedListing::with(vec![
            page(&[("v1", "2021-03-01T00:00:00Z")], Some("p2")),
            page(&[("v2", "2021-02-01T00:00:00Z")], Some("p3")),
        ]);
        let log = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            true,
        )
        .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(api.seen_cursors().len(), DEV_MAX_PAGES);
    }

    #[test]
    fn items_without_id_or_timestamp_are_passed_over() {
        let mut listing = match page(&[("v1", "2021-03-01T00:00:00Z")], None) {
            Outcome::Ok(listing) => listing,
            _ => unreachable!(),
        };
        listing.items.push(PlaylistItem {
            snippet: None,
            content_details: None,
        });
        let api = ScriptedListing::with(vec![Outcome::Ok(listing)]);
        let log = discover(
            &api,
            &AbortSignal::new(),
            "UUabc",
            ts("2000-01-01T00:00:00Z"),
            false,
        )
        .unwrap();
        assert_eq!(log.len(), 1);
    }
}
