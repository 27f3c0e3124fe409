//! Think time and iteration pacing.
use std::time::Duration;

use tokio::{sync::watch, time::Instant};

/// How a pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    /// The stop signal fired (or its sender went away) first.
    Stopped,
}

/// Sleeps for `duration` unless the stop signal fires first.
pub async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> Pause {
    if duration.is_zero() {
        return Pause::Elapsed;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Pause::Elapsed,
        _ = stop.wait_for(|stopped| *stopped) => Pause::Stopped,
    }
}

/// Whether a session should stop at its next step boundary.
pub fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Keeps every iteration at least `pacing` long.
///
/// Iterations that overran are not compensated for: the next one simply
/// starts right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    pacing: Option<Duration>,
}

impl Pacer {
    pub fn new(pacing: Option<Duration>) -> Self {
        Self { pacing }
    }

    /// Marks the start of an iteration.
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Delay still owed after an iteration that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.pacing
            .map_or(Duration::ZERO, |pacing| pacing.saturating_sub(elapsed))
    }

    /// Pauses until the iteration that began at `started` has lasted
    /// `pacing`.
    pub async fn wait(&self, started: Instant, stop: &mut watch::Receiver<bool>) -> Pause {
        pause(self.remaining(started.elapsed()), stop).await
    }
}
