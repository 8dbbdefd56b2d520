use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::{FileStreamEngine, StreamState, TickOutcome};

pub type SharedEngine = Arc<Mutex<FileStreamEngine>>;

/// Periodic driver for a playing engine.
///
/// Holds only a weak reference, so the timer never keeps an engine alive.
/// The task ends when the engine stops, is dropped, or the timer is
/// cancelled (dropping the `FeedTimer` cancels it).
pub struct FeedTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FeedTimer {
    /// Spawn a timer using the engine's configured interval.
    pub fn spawn_for(engine: &SharedEngine) -> Self {
        let interval = engine.lock().feeding_config().timer_interval();
        Self::spawn(engine, interval)
    }

    pub fn spawn(engine: &SharedEngine, interval: Duration) -> Self {
        let weak = Arc::downgrade(engine);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            run(weak, interval, token).await;
        });

        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for FeedTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(weak: Weak<Mutex<FileStreamEngine>>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(engine) = weak.upgrade() else {
            break;
        };
        let keep_running = {
            let mut guard = engine.lock();
            tick(&mut guard)
        };
        if !keep_running {
            break;
        }
    }

    tracing::debug!("Feed timer stopped");
}

/// One tick: bookkeeping, then a nudge if the engine is waiting on the
/// client buffer to drain. Returns `false` once the engine is stopped.
fn tick(engine: &mut FileStreamEngine) -> bool {
    if engine.state() == StreamState::Stopped {
        return false;
    }

    if engine.on_timer_tick() == TickOutcome::Throttled {
        if let Err(e) = engine.ready_for_send() {
            tracing::warn!(stream = %engine.name(), "Timer-driven feed failed: {}", e);
        }
    }

    engine.state() != StreamState::Stopped
}
