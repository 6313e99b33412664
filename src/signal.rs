#![forbid(unsafe_code)]

//! Process-wide abort signal shared by every worker.
//!
//! A single clone of [`AbortSignal`] travels into each channel worker.
//! The first worker to see a daily-quota response flips it; the others
//! poll it before issuing any new remote call and wind down without
//! starting more work. In-flight requests are allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use parking_lot::Mutex;

use crate::error::HarvestError;

#[derive(Debug, Default)]
struct Inner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Cooperative cancellation flag with a human-readable reason.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the run as aborted. The first caller's reason wins.
    pub fn abort(&self, reason: &str) {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_owned());
        }
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// The reason recorded by the first abort, if any.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Polled before every remote call: turns a set flag into the
    /// run-fatal error so the current channel unwinds immediately.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            let reason = self
                .reason()
                .unwrap_or_else(|| "aborted by another worker".to_owned());
            return Err(HarvestError::QuotaExhausted(reason).into());
        }
        Ok(())
    }
}
