//! Global atomic counters for evaluation sessions.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a session finalizes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    requests_sent: AtomicU64,
    request_retries: AtomicU64,
    parse_failures: AtomicU64,
    pair_failures: AtomicU64,
    batches_dispatched: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            request_retries: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            pair_failures: AtomicU64::new(0),
            batches_dispatched: AtomicU64::new(0),
        }
    }

    /// One model request left the process.
    pub fn inc_requests(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requests_sent", "counter incremented");
    }

    /// A failed request is about to be attempted again.
    pub fn inc_retries(&self) {
        self.request_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "request_retries", "counter incremented");
    }

    pub fn inc_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "parse_failures", "counter incremented");
    }

    /// A pair was given up on and excluded from totals.
    pub fn inc_pair_failures(&self) {
        self.pair_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pair_failures", "counter incremented");
    }

    pub fn inc_batches(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_dispatched", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            requests_sent = self.requests_sent(),
            request_retries = self.request_retries(),
            parse_failures = self.parse_failures(),
            pair_failures = self.pair_failures(),
            batches_dispatched = self.batches_dispatched(),
        );
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn request_retries(&self) -> u64 {
        self.request_retries.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn pair_failures(&self) -> u64 {
        self.pair_failures.load(Ordering::Relaxed)
    }

    pub fn batches_dispatched(&self) -> u64 {
        self.batches_dispatched.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.requests_sent.store(0, Ordering::Relaxed);
        self.request_retries.store(0, Ordering::Relaxed);
        self.parse_failures.store(0, Ordering::Relaxed);
        self.pair_failures.store(0, Ordering::Relaxed);
        self.batches_dispatched.store(0, Ordering::Relaxed);
    }
}
