#![forbid(unsafe_code)]

//! The closed set of harvest failures.
//!
//! Everything here is produced by exactly one component and consumed by
//! the orchestrator, which decides between abandoning one channel and
//! ending the whole run. Per-request hiccups (lost pages, rate-limit
//! backoff) never become errors at all; they are handled in place by the
//! response classifier's outcomes.

use thiserror::Error;

/// Failures that cross a component boundary.
///
/// Only [`HarvestError::QuotaExhausted`] is run-fatal; every other
/// variant abandons the channel it occurred on and lets the run
/// continue.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The input string is neither a user-style nor a channel-style
    /// reference.
    #[error("unrecognized channel reference: {0}")]
    UnrecognizedReference(String),

    /// The username lookup returned no matching channel.
    #[error("no channel found for username '{0}'")]
    UnresolvableReference(String),

    /// The first listing page of the uploads playlist had zero items.
    #[error("uploads playlist '{0}' returned no videos")]
    EmptyCollection(String),

    /// The remote reported the daily quota as spent. Nothing already
    /// persisted is rolled back; the run just stops issuing calls.
    #[error("daily API quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl HarvestError {
    /// True when the error must end the run rather than one channel.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, HarvestError::QuotaExhausted(_))
    }
}
