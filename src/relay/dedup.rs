//! Idempotent admission guard for relayed events.
//!
//! Each room owns one [`DedupGuard`]. The guard tracks content
//! fingerprints it has admitted within a retention window, plus a
//! monotonic watermark over the result channel so stale translation
//! output from an earlier cycle is refused even when its fingerprint
//! has aged out.
//!
//! The guard is a plain state machine: callers pass the current time in
//! Unix ms, which keeps every path testable without a runtime clock.

use std::collections::HashMap;
use std::time::Duration;

/// Tuning for a room's dedup guard.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long an admitted fingerprint blocks duplicates.
    pub window: Duration,
    /// How often the periodic sweep purges aged entries.
    pub sweep_interval: Duration,
    /// Upper bound on tracked fingerprints per room.
    pub max_entries: usize,
    /// How long a translation cycle stays open after its trigger.
    pub cycle_timeout: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_entries: 10_000,
            cycle_timeout: Duration::from_secs(30),
        }
    }
}

impl DedupConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }
}

/// Outcome of a fingerprint admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the window; event admitted.
    Fresh,
    /// Seen recently; event refused.
    Duplicate,
    /// A stale entry existed and was refreshed; event admitted.
    Expired,
}

impl Admission {
    /// Whether the event passes through to fan-out.
    pub fn accepted(self) -> bool {
        !matches!(self, Admission::Duplicate)
    }
}

/// Verdict for a result event against the watermark and cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCheck {
    /// Timestamp is ahead of the watermark and the cycle is open.
    Pass,
    /// Timestamp at or behind the watermark; output of an earlier cycle.
    Stale,
    /// The cycle deadline has passed; refused until the next trigger.
    CycleExpired,
}

#[derive(Debug)]
struct SeenEntry {
    first_seen: u64,
}

/// Per-room admission state.
#[derive(Debug)]
pub struct DedupGuard {
    seen: HashMap<u64, SeenEntry>,
    result_watermark: u64,
    cycle_deadline: Option<u64>,
    window_ms: u64,
    cycle_timeout_ms: u64,
    max_entries: usize,
}

impl DedupGuard {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            seen: HashMap::new(),
            result_watermark: 0,
            cycle_deadline: None,
            window_ms: config.window.as_millis() as u64,
            cycle_timeout_ms: config.cycle_timeout.as_millis() as u64,
            max_entries: config.max_entries,
        }
    }

    /// Admit or refuse a fingerprint at time `now`.
    ///
    /// An entry inside the window refuses the event. An entry past the
    /// window counts as absent even if the sweep has not purged it yet;
    /// it is refreshed and the event admitted.
    pub fn admit(&mut self, fingerprint: u64, now: u64) -> Admission {
        if let Some(entry) = self.seen.get_mut(&fingerprint) {
            if now.saturating_sub(entry.first_seen) < self.window_ms {
                return Admission::Duplicate;
            }
            entry.first_seen = now;
            return Admission::Expired;
        }

        if self.seen.len() >= self.max_entries {
            self.sweep(now);
            if self.seen.len() >= self.max_entries {
                self.evict_oldest();
            }
        }

        self.seen.insert(fingerprint, SeenEntry { first_seen: now });
        Admission::Fresh
    }

    /// Check a result-channel timestamp against the watermark and the
    /// cycle deadline. Does not mutate state; call
    /// [`DedupGuard::advance_watermark`] once the event is fully
    /// admitted.
    pub fn check_result(&self, origin_ts: u64, now: u64) -> ResultCheck {
        if let Some(deadline) = self.cycle_deadline {
            if now > deadline {
                return ResultCheck::CycleExpired;
            }
        }
        if origin_ts <= self.result_watermark {
            return ResultCheck::Stale;
        }
        ResultCheck::Pass
    }

    /// Raise the watermark to an admitted result's timestamp. Never
    /// regresses.
    pub fn advance_watermark(&mut self, origin_ts: u64) {
        if origin_ts > self.result_watermark {
            self.result_watermark = origin_ts;
        }
    }

    /// Start a translation cycle at time `at`: the watermark resets to
    /// the trigger baseline and the cycle deadline is re-armed.
    pub fn begin_cycle(&mut self, at: u64) {
        self.result_watermark = at;
        self.cycle_deadline = Some(at + self.cycle_timeout_ms);
    }

    /// Purge entries whose window has elapsed. Returns how many were
    /// removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.seen.len();
        let window_ms = self.window_ms;
        self.seen
            .retain(|_, entry| now.saturating_sub(entry.first_seen) < window_ms);
        before - self.seen.len()
    }

    /// Tracked fingerprint count, including entries not yet swept.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn watermark(&self) -> u64 {
        self.result_watermark
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .seen
            .iter()
            .min_by_key(|(_, entry)| entry.first_seen)
            .map(|(fp, _)| *fp)
        {
            self.seen.remove(&oldest);
        }
    }
}
