use std::time::Duration;
use tokio::time::Instant;

/// Wall clock vs media clock bookkeeping for one stream.
///
/// `sent_ms` is the presentation timestamp of the last frame handed out,
/// `base_ms` the presentation time at which the current feeding run began.
/// Their difference, minus the wall time since feeding started, is how far
/// the client is ahead of real time.
#[derive(Debug, Clone, Copy)]
pub struct PacingClock {
    feeding_started_at: Instant,
    sent_ms: u64,
    base_ms: u64,
    ahead_at_pause_ms: u64,
}

impl Default for PacingClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PacingClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            feeding_started_at: Instant::now(),
            sent_ms: 0,
            base_ms: 0,
            ahead_at_pause_ms: 0,
        }
    }

    /// Start a fresh feeding run at `position_ms` (play, seek).
    pub fn restart(&mut self, position_ms: u64) {
        self.feeding_started_at = Instant::now();
        self.sent_ms = position_ms;
        self.base_ms = position_ms;
        self.ahead_at_pause_ms = 0;
    }

    pub fn record_sent(&mut self, timestamp_ms: u64) {
        self.sent_ms = timestamp_ms;
    }

    /// Remember how much look-ahead the client holds when it pauses.
    pub fn pause(&mut self) {
        self.ahead_at_pause_ms = self.ahead_ms().max(0).unsigned_abs();
    }

    /// Restart the wall clock at the resume point. The look-ahead the client
    /// held at pause time is still in its buffer.
    pub fn resume(&mut self) {
        self.feeding_started_at = Instant::now();
        self.base_ms = self.sent_ms.saturating_sub(self.ahead_at_pause_ms);
        self.ahead_at_pause_ms = 0;
    }

    /// Forget accumulated drift: the client is considered exactly caught up.
    pub fn rebase(&mut self) {
        self.feeding_started_at = Instant::now();
        self.base_ms = self.sent_ms;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.feeding_started_at.elapsed()
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Media time handed out since the run began.
    #[must_use]
    pub fn presented_ms(&self) -> i64 {
        to_signed(self.sent_ms) - to_signed(self.base_ms)
    }

    /// How far the delivered media runs ahead of the wall clock. Negative
    /// when the stream is behind.
    #[must_use]
    pub fn ahead_ms(&self) -> i64 {
        self.presented_ms() - to_signed(self.elapsed_ms())
    }

    /// `true` once the look-ahead reaches the client buffer. A buffer of
    /// zero or less disables throttling.
    #[must_use]
    pub fn is_throttled(&self, client_buffer_seconds: i32) -> bool {
        client_buffer_seconds > 0 && self.ahead_ms() >= i64::from(client_buffer_seconds) * 1000
    }

    #[must_use]
    pub const fn sent_ms(&self) -> u64 {
        self.sent_ms
    }

    #[must_use]
    pub const fn base_ms(&self) -> u64 {
        self.base_ms
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
