#![forbid(unsafe_code)]

//! Wire layer for the YouTube Data API v3.
//!
//! Three endpoints matter to the harvester: `channels.list` (username
//! lookup), `playlistItems.list` (upload listing pages), and
//! `videos.list` (batched statistics). Every response — success or
//! failure — funnels through [`classify`], the single place that
//! interprets the remote's error reasons. Call sites only ever match on
//! [`Outcome`] variants.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::security::redact_key;

pub const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Listing page size and the `videos.list` per-call id cap. Both are
/// the API's documented maximum of 50.
pub const PAGE_SIZE: usize = 50;
pub const BATCH_SIZE: usize = 50;

/// Courtesy delay slept before every request. Independent of the
/// classifier's rate-limit backoff; this one is always paid.
pub const POLITENESS_DELAY: Duration = Duration::from_millis(250);

/// Fixed backoff when the remote reports burst rate limiting. Quota
/// buckets refill hourly, so shorter retries just burn more quota.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(3600);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What a remote call came back as, after classification.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Decoded payload.
    Ok(T),
    /// Back off for the given duration, then replay the same request.
    Retry(Duration),
    /// Daily quota exhausted; the whole run must stop.
    Abort(String),
    /// This one request is lost (decode failure, malformed request,
    /// transport error). The caller proceeds as if it returned nothing.
    Skip(String),
}

/// The seam between the harvest engine and the remote service. The
/// production implementation is [`ApiClient`]; tests script responses
/// behind the same three calls.
pub trait VideoApi {
    fn channel_for_username(&self, username: &str) -> Outcome<ChannelListResponse>;
    fn playlist_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Outcome<PlaylistItemsResponse>;
    fn video_batch(&self, ids: &[String]) -> Outcome<VideoListResponse>;
}

// ---------------------------------------------------------------------
// Response shapes. Everything below the top level is optional; older
// videos routinely lack fields and the parsers normalize at the edge.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChannelListResponse {
    #[serde(default)]
    pub items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelItem {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemsResponse {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub snippet: Option<PlaylistItemSnippet>,
    pub content_details: Option<PlaylistItemContentDetails>,
}

impl PlaylistItem {
    pub fn video_id(&self) -> Option<&str> {
        self.snippet
            .as_ref()?
            .resource_id
            .as_ref()?
            .video_id
            .as_deref()
    }

    /// The video's own publish time. `contentDetails.videoPublishedAt`
    /// is preferred; `snippet.publishedAt` is when the item landed in
    /// the playlist, which for uploads is close enough to serve as a
    /// fallback.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.content_details
            .as_ref()
            .and_then(|details| details.video_published_at)
            .or_else(|| self.snippet.as_ref().and_then(|s| s.published_at))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub resource_id: Option<ResourceId>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    pub video_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
pub struct VideoItem {
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
pub struct Thumbnails {
    pub high: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    #[serde(rename = "default")]
    pub fallback: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available thumbnail URL, matching the resolution
    /// preference of the upstream catalog.
    pub fn best_url(&self) -> Option<&str> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.fallback.as_ref())
            .map(|thumb| thumb.url.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

/// Statistics arrive as JSON strings; parse failures read as absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub comment_count: Option<String>,
    pub like_count: Option<String>,
    pub dislike_count: Option<String>,
}

// ---------------------------------------------------------------------
// Error envelope + classification.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

/// Turns a raw response into an [`Outcome`]. The one chokepoint that
/// reads the remote's reason codes; nothing outside this function
/// matches on error strings.
pub fn classify<T: DeserializeOwned>(status: u16, body: &str) -> Outcome<T> {
    if (200..300).contains(&status) {
        return match serde_json::from_str::<T>(body) {
            Ok(payload) => Outcome::Ok(payload),
            Err(err) => Outcome::Skip(format!("undecodable response body: {err}")),
        };
    }

    let envelope: ErrorEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return Outcome::Skip(format!("undecodable error body (status {status}): {err}"));
        }
    };
    let reasons: Vec<&str> = envelope
        .error
        .errors
        .iter()
        .filter_map(|detail| detail.reason.as_deref())
        .collect();

    if reasons.contains(&"dailyLimitExceeded") {
        let message = envelope
            .error
            .message
            .unwrap_or_else(|| "dailyLimitExceeded".to_owned());
        return Outcome::Abort(message);
    }
    if reasons
        .iter()
        .any(|reason| matches!(*reason, "quotaExceeded" | "rateLimitExceeded" | "userRateLimitExceeded"))
    {
        return Outcome::Retry(RATE_LIMIT_BACKOFF);
    }
    if reasons
        .iter()
        .any(|reason| matches!(*reason, "badRequest" | "invalid" | "invalidParameter"))
    {
        return Outcome::Skip(format!("malformed request (status {status}): {reasons:?}"));
    }
    // Unknown reason: keep the whole body so the log is enough to
    // diagnose new failure modes without re-running.
    Outcome::Skip(format!("unhandled API error (status {status}): {body}"))
}

// ---------------------------------------------------------------------
// Blocking client.
// ---------------------------------------------------------------------

/// Blocking HTTP client for the three harvester endpoints.
///
/// Sleeps the politeness delay before every request, bounds each call
/// with a 30-second timeout (a hung call becomes a `Skip`, never a
/// stall), and appends the quota key to every URL. Logged URLs always
/// pass through [`redact_key`] first.
pub struct ApiClient {
    agent: ureq::Agent,
    key: String,
    politeness: Duration,
}

impl ApiClient {
    pub fn new(key: &str) -> Self {
        Self::with_politeness(key, POLITENESS_DELAY)
    }

    /// Mainly for tests and development runs that should not sleep.
    pub fn with_politeness(key: &str, politeness: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            key: key.to_owned(),
            politeness,
        }
    }

    fn lookup_url(&self, username: &str) -> String {
        format!(
            "{API_BASE}/channels?part=id&forUsername={username}&key={}",
            self.key
        )
    }

    fn listing_url(&self, playlist_id: &str, cursor: Option<&str>) -> String {
        let mut url = format!(
            "{API_BASE}/playlistItems?part=snippet,contentDetails&playlistId={playlist_id}&maxResults={PAGE_SIZE}&key={}",
            self.key
        );
        if let Some(cursor) = cursor {
            url.push_str("&pageToken=");
            url.push_str(cursor);
        }
        url
    }

    fn batch_url(&self, ids: &[String]) -> String {
        format!(
            "{API_BASE}/videos?part=snippet,statistics&id={}&key={}",
            ids.join(","),
            self.key
        )
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Outcome<T> {
        if !self.politeness.is_zero() {
            thread::sleep(self.politeness);
        }
        let (status, body) = match self.agent.get(url).call() {
            Ok(response) => {
                let status = response.status();
                match response.into_string() {
                    Ok(body) => (status, body),
                    Err(err) => {
                        return Outcome::Skip(format!(
                            "reading response from {}: {err}",
                            redact_key(url)
                        ));
                    }
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                (status, body)
            }
            Err(ureq::Error::Transport(err)) => {
                return Outcome::Skip(format!(
                    "transport failure for {}: {err}",
                    redact_key(url)
                ));
            }
        };
        classify(status, &body)
    }
}

impl VideoApi for ApiClient {
    fn channel_for_username(&self, username: &str) -> Outcome<ChannelListResponse> {
        self.get(&self.lookup_url(username))
    }

    fn playlist_page(
        &self,
        playlist_id: &str,
        cursor: Option<&str>,
    ) -> Outcome<PlaylistItemsResponse> {
        self.get(&self.listing_url(playlist_id, cursor))
    }

    fn video_batch(&self, ids: &[String]) -> Outcome<VideoListResponse> {
        self.get(&self.batch_url(ids))
    }
}
