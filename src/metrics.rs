//! Metrics collection for the portal core
//!
//! Tracks cache effectiveness (hits, misses, coalesced fetches) and credits
//! synchronization outcomes, plus a short history of synchronization errors.
//! Used for diagnostics and the debug log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Point-in-time view of a cache's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Fresh entries served without fetching
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
    /// Callers that joined a fetch already in flight
    pub coalesced: u64,
    /// Fetch functions actually invoked
    pub fetches: u64,
    /// Fetches that completed with an error
    pub failures: u64,
}

/// Lock-free counters owned by a `DataCache`.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl CacheCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Summary statistics for the credits synchronizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Resolution cycles started (token, poll or manual refresh)
    pub resolutions_started: u64,
    /// Resolution cycles whose result was applied
    pub resolutions_applied: u64,
    /// Resolution cycles that ended in an error
    pub resolution_failures: u64,
    /// Results discarded because a newer update or token superseded them
    pub stale_discarded: u64,
    /// `credits:updated` messages applied from the push channel
    pub push_updates: u64,
    /// Most recent error, if any
    pub last_error: Option<ErrorRecord>,
}

/// Record of an error that occurred during synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the error occurred
    pub timestamp: DateTime<Utc>,
    /// Category of error (e.g., "profile", "organization", "push")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
}

/// Collector owned by the synchronizer task (single writer).
#[derive(Debug, Default)]
pub struct SyncMetrics {
    summary: SyncSummary,
    errors: VecDeque<ErrorRecord>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution_started(&mut self) {
        self.summary.resolutions_started += 1;
    }

    pub fn resolution_applied(&mut self) {
        self.summary.resolutions_applied += 1;
    }

    pub fn stale_discarded(&mut self) {
        self.summary.stale_discarded += 1;
    }

    pub fn push_update(&mut self) {
        self.summary.push_updates += 1;
    }

    /// Record a failed resolution together with its error.
    pub fn resolution_failed(&mut self, error_type: &str, message: String) {
        self.summary.resolution_failures += 1;
        self.record_error(error_type, message);
    }

    /// Record an error without counting a failed resolution (e.g. push setup).
    pub fn record_error(&mut self, error_type: &str, message: String) {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            error_type: error_type.to_string(),
            message,
        };

        self.errors.push_back(record.clone());
        while self.errors.len() > MAX_ERROR_HISTORY {
            self.errors.pop_front();
        }
        self.summary.last_error = Some(record);
    }

    pub fn get_summary(&self) -> SyncSummary {
        self.summary.clone()
    }

    /// Error history, most recent first
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        self.errors.iter().rev().cloned().collect()
    }
}
