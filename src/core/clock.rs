//! Elapsed test time
//!
//! [`Stopwatch`] accumulates running time across start/stop cycles so a
//! paused run does not count the paused interval. It reads
//! `tokio::time::Instant`, which follows the runtime's clock and therefore
//! also the paused clock used in tests.

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::bus::EventSink;

/// Refresh cadence of the live `Test Time` display.
pub const DISPLAY_REFRESH: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopwatch that is already running.
    pub fn started() -> Self {
        let mut watch = Self::new();
        watch.start();
        watch
    }

    /// Start or resume. No-op while running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Freeze the current reading. No-op while stopped.
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Stop and zero.
    pub fn reset(&mut self) {
        self.started = None;
        self.accumulated = Duration::ZERO;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.accumulated + started.elapsed(),
            None => self.accumulated,
        }
    }
}

/// Render as `hh:mm:ss`. Hours are not wrapped at 24.
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Publish the stopwatch reading every [`DISPLAY_REFRESH`] while it runs.
///
/// The ticker ends when `done` is cancelled.
pub fn spawn_ticker(
    clock: Arc<Mutex<Stopwatch>>,
    sink: EventSink,
    done: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DISPLAY_REFRESH);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = interval.tick() => {
                    let reading = {
                        let clock = clock.lock();
                        clock.is_running().then(|| clock.elapsed())
                    };
                    if let Some(elapsed) = reading {
                        sink.test_time(elapsed);
                    }
                }
            }
        }
    })
}
