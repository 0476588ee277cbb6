//! Rolling, bucketed counter of call outcomes.
//!
//! # Responsibilities
//! - Partition a fixed window (e.g. 10s) into equal buckets (e.g. 10 x 1s)
//! - Count success / failure / timeout / short-circuited per bucket
//! - Report volume and error rate over the buckets still inside the window
//!
//! # Design Decisions
//! - Lazy eviction: a slot whose bucket index has fallen out of the window
//!   reads as empty and is zeroed on its next write; no sweeper task
//! - Buckets are a fixed ring indexed by `elapsed / bucket_width`
//! - One mutex per window, so contention is scoped to a single command key

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Kind of a completed (or denied) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    ShortCircuited,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::ShortCircuited => "short_circuited",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, OutcomeKind::Success)
    }
}

/// Result of one protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub latency: Duration,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, latency: Duration) -> Self {
        Self { kind, latency }
    }

    pub fn short_circuited() -> Self {
        Self::new(OutcomeKind::ShortCircuited, Duration::ZERO)
    }
}

/// Aggregated counts over the live part of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub short_circuited: u64,
}

impl WindowCounts {
    pub fn volume(&self) -> u64 {
        self.success + self.failure + self.timeout + self.short_circuited
    }

    pub fn errors(&self) -> u64 {
        self.failure + self.timeout + self.short_circuited
    }

    /// Error percentage in `0.0..=100.0`; zero when there is no traffic.
    pub fn error_rate(&self) -> f64 {
        let volume = self.volume();
        if volume == 0 {
            return 0.0;
        }
        self.errors() as f64 * 100.0 / volume as f64
    }

    fn add(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::Failure => self.failure += 1,
            OutcomeKind::Timeout => self.timeout += 1,
            OutcomeKind::ShortCircuited => self.short_circuited += 1,
        }
    }

    fn merge(&mut self, other: &WindowCounts) {
        self.success += other.success;
        self.failure += other.failure;
        self.timeout += other.timeout;
        self.short_circuited += other.short_circuited;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Absolute bucket index this slot currently holds.
    index: u64,
    counts: WindowCounts,
}

/// Fixed-duration rolling counter of call outcomes.
#[derive(Debug)]
pub struct MetricsWindow {
    origin: Instant,
    bucket_width: Duration,
    slots: Mutex<Vec<Slot>>,
}

impl MetricsWindow {
    /// Create a window of `buckets` buckets spanning `window` in total.
    ///
    /// Widths below one millisecond are rounded up to one millisecond.
    pub fn new(window: Duration, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let bucket_width = (window / buckets as u32).max(Duration::from_millis(1));
        Self {
            origin: Instant::now(),
            bucket_width,
            slots: Mutex::new(vec![Slot::default(); buckets]),
        }
    }

    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    pub fn bucket_count(&self) -> usize {
        self.slots.lock().expect("metrics window mutex poisoned").len()
    }

    /// Record an outcome in the bucket for the current time.
    pub fn record(&self, kind: OutcomeKind) {
        self.record_at(kind, Instant::now());
    }

    pub(crate) fn record_at(&self, kind: OutcomeKind, now: Instant) {
        let index = self.bucket_index(now);
        let mut slots = self.slots.lock().expect("metrics window mutex poisoned");
        let len = slots.len() as u64;
        let slot = &mut slots[(index % len) as usize];
        if slot.index != index {
            *slot = Slot {
                index,
                counts: WindowCounts::default(),
            };
        }
        slot.counts.add(kind);
    }

    /// Counts summed over every bucket still inside the window.
    pub fn counts(&self) -> WindowCounts {
        self.counts_at(Instant::now())
    }

    pub(crate) fn counts_at(&self, now: Instant) -> WindowCounts {
        let current = self.bucket_index(now);
        let slots = self.slots.lock().expect("metrics window mutex poisoned");
        let len = slots.len() as u64;
        let mut total = WindowCounts::default();
        for slot in slots.iter() {
            // Slots written in a bucket older than `len` buckets ago are stale.
            if slot.index <= current && current - slot.index < len {
                total.merge(&slot.counts);
            }
        }
        total
    }

    pub fn volume(&self) -> u64 {
        self.counts().volume()
    }

    pub fn error_rate(&self) -> f64 {
        self.counts().error_rate()
    }

    /// Drop every recorded outcome and start a fresh window.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().expect("metrics window mutex poisoned");
        for slot in slots.iter_mut() {
            *slot = Slot::default();
        }
    }

    fn bucket_index(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos()) as u64
    }
}
