//! Ghosting protection for A2 refreshes
//!
//! A2 is the fastest waveform but leaves a trace of every previous image.
//! After a number of consecutive A2 refreshes the panel needs a full INIT
//! clear. [`RefreshCounter`] counts them and tells the caller when.

use crate::mode::DisplayMode;

/// Consecutive A2 refreshes before a clear is forced
pub const DEFAULT_A2_REFRESH_LIMIT: u32 = 10;

/// What to do before the next refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAdvice {
    /// Go ahead
    Proceed,
    /// Go ahead, the next A2 refresh clears first
    Approaching {
        /// Refreshes counted so far
        count: u32,
        /// The configured limit
        limit: u32,
    },
    /// Clear the panel, then go ahead
    ClearFirst,
}

/// Counts consecutive A2 refreshes since the last full clear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshCounter {
    count: u32,
    limit: u32,
}

impl Default for RefreshCounter {
    fn default() -> Self {
        RefreshCounter::new(DEFAULT_A2_REFRESH_LIMIT)
    }
}

impl RefreshCounter {
    /// A counter forcing a clear every `limit` A2 refreshes, 0 disables it
    pub fn new(limit: u32) -> Self {
        RefreshCounter { count: 0, limit }
    }

    // The count after one more refresh in `mode`, `None` if it isn't counted
    fn next_count(&self, mode: DisplayMode) -> Option<u32> {
        if mode != DisplayMode::A2 || self.limit == 0 {
            return None;
        }
        Some(self.count.saturating_add(1))
    }

    /// What to do before a refresh in `mode`. Nothing is counted until
    /// [`commit`](RefreshCounter::commit).
    pub fn advise(&self, mode: DisplayMode) -> RefreshAdvice {
        match self.next_count(mode) {
            None => RefreshAdvice::Proceed,
            Some(next) if next >= self.limit => RefreshAdvice::ClearFirst,
            Some(next) if next == self.limit - 1 => RefreshAdvice::Approaching {
                count: next,
                limit: self.limit,
            },
            Some(_) => RefreshAdvice::Proceed,
        }
    }

    /// Counts a refresh in `mode` that went through. The refresh that
    /// reaches the limit followed a clear, so the count goes back to 0.
    pub fn commit(&mut self, mode: DisplayMode) {
        if let Some(next) = self.next_count(mode) {
            self.count = if next >= self.limit { 0 } else { next };
        }
    }

    /// A full clear happened
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// A2 refreshes since the last clear
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The configured limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Changes the limit, the count is kept
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }
}
