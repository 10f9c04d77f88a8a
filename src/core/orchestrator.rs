//! Automated two-phase loopback test
//!
//! A run sends 25 probes from link A to link B (phase 1) and then 25 probes
//! from B to A (phase 2), one at a time. Between steps the run honours a
//! cooperative pause and can be stopped at any point; the stopwatch only
//! counts time spent running.
//!
//! ```text
//! Idle ─start─▶ Phase1 ─▶ Phase2 ─▶ Completed
//!                 │          │
//!                 └──stop────┴──▶ Stopped
//! ```
//!
//! A new run may start from `Idle`, `Completed` or `Stopped`; a start request
//! while a phase is running is ignored.

use derive_more::{Display, Error};
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{
    bus::EventSink,
    clock::{format_hms, spawn_ticker, Stopwatch},
    exchange::{Direction, ExchangeError, ExchangeOutcome, Probe, ProbeExchange, RESPONSE_TIMEOUT},
    relay::PassThroughRelay,
};
use crate::protocol::link::{Link, LinkError};

/// Denominator of every phase, whatever happened during the run.
pub const STEPS_PER_PHASE: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunPhase {
    Idle,
    Phase1,
    Phase2,
    Completed,
    Stopped,
}

impl RunPhase {
    pub fn is_active(self) -> bool {
        matches!(self, RunPhase::Phase1 | RunPhase::Phase2)
    }

    fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::AToB => RunPhase::Phase1,
            Direction::BToA => RunPhase::Phase2,
        }
    }
}

/// Timing of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    pub response_timeout: Duration,
    /// Pause after every step, whatever its outcome.
    pub step_delay: Duration,
    /// Wake-up interval while paused.
    pub pause_poll: Duration,
}

impl Default for TestPlan {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            step_delay: Duration::from_millis(100),
            pause_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseResult {
    pub passed: u32,
    pub attempted: u32,
    pub timed_out: u32,
    pub total: u32,
}

impl Default for PhaseResult {
    fn default() -> Self {
        Self {
            passed: 0,
            attempted: 0,
            timed_out: 0,
            total: STEPS_PER_PHASE,
        }
    }
}

impl PhaseResult {
    pub fn success_rate(&self) -> f64 {
        rate(self.passed, self.total)
    }

    fn record(&mut self, outcome: &ExchangeOutcome) {
        self.attempted += 1;
        if outcome.passed {
            self.passed += 1;
        }
        if outcome.timed_out {
            self.timed_out += 1;
        }
    }
}

fn rate(passed: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(passed) * 100.0 / f64::from(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunOutcome {
    Completed,
    /// Stopped on request.
    Stopped,
    /// Stopped by a link failure.
    Aborted,
}

/// Final report of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub phase1: PhaseResult,
    pub phase2: PhaseResult,
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn overall_passed(&self) -> u32 {
        self.phase1.passed + self.phase2.passed
    }

    pub fn overall_total(&self) -> u32 {
        self.phase1.total + self.phase2.total
    }

    pub fn overall_rate(&self) -> f64 {
        rate(self.overall_passed(), self.overall_total())
    }

    pub fn all_passed(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.overall_passed() == self.overall_total()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Phase 1 Test: {}/{} ({:.2}%)",
            self.phase1.passed,
            self.phase1.total,
            self.phase1.success_rate()
        )?;
        writeln!(
            f,
            "Phase 2 Test: {}/{} ({:.2}%)",
            self.phase2.passed,
            self.phase2.total,
            self.phase2.success_rate()
        )?;
        writeln!(
            f,
            "Overall: {}/{} ({:.2}%)",
            self.overall_passed(),
            self.overall_total(),
            self.overall_rate()
        )?;
        write!(f, "Total Test Time: {}", format_hms(self.elapsed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum RunError {
    /// A link could not be opened, no probe was sent.
    #[display("{_0}")]
    LinkOpen(#[error(source)] LinkError),
}

/// State of the current (or last) run.
struct TestRunState {
    phase: RunPhase,
    paused: bool,
    clock: Arc<Mutex<Stopwatch>>,
    cancel: CancellationToken,
    phase1: PhaseResult,
    phase2: PhaseResult,
}

impl TestRunState {
    fn idle() -> Self {
        Self {
            phase: RunPhase::Idle,
            paused: false,
            clock: Arc::new(Mutex::new(Stopwatch::new())),
            cancel: CancellationToken::new(),
            phase1: PhaseResult::default(),
            phase2: PhaseResult::default(),
        }
    }

    fn running() -> Self {
        Self {
            phase: RunPhase::Phase1,
            clock: Arc::new(Mutex::new(Stopwatch::started())),
            ..Self::idle()
        }
    }

    fn result_mut(&mut self, direction: Direction) -> &mut PhaseResult {
        match direction {
            Direction::AToB => &mut self.phase1,
            Direction::BToA => &mut self.phase2,
        }
    }
}

/// Point-in-time view of the run state.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub phase: RunPhase,
    pub paused: bool,
    pub elapsed: Duration,
    pub cancel_requested: bool,
    pub phase1: PhaseResult,
    pub phase2: PhaseResult,
}

/// Handle to a spawned run.
pub struct RunHandle {
    join: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Wait for the run to finish and return its summary.
    pub async fn wait(self) -> Result<RunSummary, JoinError> {
        self.join.await
    }
}

struct Inner {
    relay_a: Arc<PassThroughRelay>,
    relay_b: Arc<PassThroughRelay>,
    sink: EventSink,
    plan: TestPlan,
    state: Mutex<TestRunState>,
}

pub struct TestOrchestrator {
    inner: Arc<Inner>,
}

impl TestOrchestrator {
    pub fn new(
        relay_a: Arc<PassThroughRelay>,
        relay_b: Arc<PassThroughRelay>,
        sink: EventSink,
        plan: TestPlan,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay_a,
                relay_b,
                sink,
                plan,
                state: Mutex::new(TestRunState::idle()),
            }),
        }
    }

    pub fn plan(&self) -> &TestPlan {
        &self.inner.plan
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().phase.is_active()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.inner.state.lock();
        let elapsed = state.clock.lock().elapsed();
        RunSnapshot {
            phase: state.phase,
            paused: state.paused,
            elapsed,
            cancel_requested: state.cancel.is_cancelled(),
            phase1: state.phase1,
            phase2: state.phase2,
        }
    }

    /// Begin a new run on the current tokio runtime.
    ///
    /// Returns `Ok(None)` without doing anything while a run is active.
    /// Links that are closed get opened; if either fails, any link this call
    /// opened is closed again and the state becomes `Stopped`.
    pub fn start(&self) -> Result<Option<RunHandle>, RunError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.phase.is_active() {
            log::debug!("Start ignored, a run is already active ({})", state.phase);
            return Ok(None);
        }

        inner.sink.info("Starting test procedure...");
        if let Err(err) = inner.open_links() {
            *state = TestRunState {
                phase: RunPhase::Stopped,
                ..TestRunState::idle()
            };
            return Err(RunError::LinkOpen(err));
        }

        *state = TestRunState::running();
        let cancel = state.cancel.clone();
        let clock = Arc::clone(&state.clock);
        drop(state);

        inner.sink.paused(false);
        let done = CancellationToken::new();
        spawn_ticker(clock, inner.sink.clone(), done.clone());

        let runner = Arc::clone(inner);
        let join = tokio::spawn(async move {
            let result = runner.execute(&cancel).await;
            let summary = runner.finish(result);
            done.cancel();
            summary
        });
        Ok(Some(RunHandle { join }))
    }

    /// Pause a running test, or resume a paused one.
    ///
    /// Returns the new paused state, or `None` when no run is active.
    pub fn toggle_pause(&self) -> Option<bool> {
        let mut state = self.inner.state.lock();
        if !state.phase.is_active() || state.cancel.is_cancelled() {
            return None;
        }
        state.paused = !state.paused;
        if state.paused {
            state.clock.lock().stop();
            self.inner.sink.info("Test paused.");
        } else {
            state.clock.lock().start();
            self.inner.sink.info("Test resumed.");
        }
        self.inner.sink.paused(state.paused);
        Some(state.paused)
    }

    /// Request cancellation of the active run and zero the test time display.
    ///
    /// Returns `false` when no run is active.
    pub fn stop(&self) -> bool {
        let state = self.inner.state.lock();
        if !state.phase.is_active() {
            return false;
        }
        state.cancel.cancel();
        state.clock.lock().reset();
        self.inner.sink.info("Test stop requested.");
        self.inner.sink.test_time(Duration::ZERO);
        true
    }
}

impl Inner {
    fn open_links(&self) -> Result<(), LinkError> {
        let mut opened: Vec<&Arc<dyn Link>> = Vec::new();
        for relay in [&self.relay_a, &self.relay_b] {
            let link = relay.link();
            if link.is_open() {
                continue;
            }
            match link.open() {
                Ok(()) => {
                    self.sink.link_status(link.id(), true);
                    self.sink.info(format!("{} auto-opened for test.", link.id()));
                    opened.push(link);
                }
                Err(err) => {
                    self.sink
                        .error(format!("Error auto-opening {}: {err}", link.id()));
                    for link in opened {
                        match link.close() {
                            Ok(()) => self.sink.link_status(link.id(), false),
                            Err(err) => log::warn!("Failed to close {}: {err}", link.id()),
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn relays(&self, direction: Direction) -> (&PassThroughRelay, &PassThroughRelay) {
        match direction {
            Direction::AToB => (&*self.relay_a, &*self.relay_b),
            Direction::BToA => (&*self.relay_b, &*self.relay_a),
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), ExchangeError> {
        let exchange = ProbeExchange::new(self.sink.clone(), self.plan.response_timeout);

        for (index, direction) in [Direction::AToB, Direction::BToA].into_iter().enumerate() {
            self.state.lock().phase = RunPhase::for_direction(direction);
            let (source, destination) = self.relays(direction);
            let first = index as u32 * STEPS_PER_PHASE + 1;

            for step in first..first + STEPS_PER_PHASE {
                if cancel.is_cancelled() {
                    return Err(ExchangeError::Cancelled);
                }
                self.wait_while_paused(cancel).await?;

                let probe = Probe::new(step, direction);
                let outcome = exchange
                    .run(source.link(), destination, &probe, cancel)
                    .await?;
                self.state.lock().result_mut(direction).record(&outcome);

                sleep_or_cancel(self.plan.step_delay, cancel).await?;
            }
        }
        Ok(())
    }

    async fn wait_while_paused(&self, cancel: &CancellationToken) -> Result<(), ExchangeError> {
        loop {
            let paused = self.state.lock().paused;
            if !paused {
                return Ok(());
            }
            sleep_or_cancel(self.plan.pause_poll, cancel).await?;
        }
    }

    fn finish(&self, result: Result<(), ExchangeError>) -> RunSummary {
        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(ExchangeError::Cancelled) => RunOutcome::Stopped,
            Err(ExchangeError::Link(err)) => {
                log::debug!("I/O failure on {} ends the run", err.link());
                self.sink.error(format!("Test aborted: {err}"));
                RunOutcome::Aborted
            }
        };

        let summary = {
            let mut state = self.state.lock();
            let elapsed = {
                let mut clock = state.clock.lock();
                clock.stop();
                clock.elapsed()
            };
            state.phase = match outcome {
                RunOutcome::Completed => RunPhase::Completed,
                RunOutcome::Stopped | RunOutcome::Aborted => RunPhase::Stopped,
            };
            state.paused = false;
            RunSummary {
                phase1: state.phase1,
                phase2: state.phase2,
                elapsed,
                outcome,
            }
        };

        match outcome {
            RunOutcome::Completed => self.sink.info("Test procedure completed."),
            RunOutcome::Stopped | RunOutcome::Aborted => {
                self.sink.info("Test procedure was stopped.")
            }
        }
        self.sink.paused(false);
        self.sink.test_time(summary.elapsed);
        self.sink.summary(summary.clone());
        summary
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), ExchangeError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExchangeError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(passed: bool, timed_out: bool) -> ExchangeOutcome {
        ExchangeOutcome {
            probe: Probe::new(1, Direction::AToB),
            received: None,
            passed,
            timed_out,
        }
    }

    #[test]
    fn phase_result_keeps_fixed_denominator() {
        let mut result = PhaseResult::default();
        result.record(&outcome(true, false));
        result.record(&outcome(false, true));
        result.record(&outcome(false, false));

        assert_eq!(result.attempted, 3);
        assert_eq!(result.passed, 1);
        assert_eq!(result.timed_out, 1);
        assert_eq!(result.total, STEPS_PER_PHASE);
        assert!((result.success_rate() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_renders_report_block() {
        let summary = RunSummary {
            phase1: PhaseResult {
                passed: 25,
                attempted: 25,
                ..PhaseResult::default()
            },
            phase2: PhaseResult {
                passed: 12,
                attempted: 25,
                ..PhaseResult::default()
            },
            elapsed: Duration::from_secs(61),
            outcome: RunOutcome::Completed,
        };

        assert_eq!(
            summary.to_string(),
            "Phase 1 Test: 25/25 (100.00%)\n\
             Phase 2 Test: 12/25 (48.00%)\n\
             Overall: 37/50 (74.00%)\n\
             Total Test Time: 00:01:01"
        );
        assert!(!summary.all_passed());
    }

    #[test]
    fn only_running_phases_are_active() {
        assert!(RunPhase::Phase1.is_active());
        assert!(RunPhase::Phase2.is_active());
        assert!(!RunPhase::Idle.is_active());
        assert!(!RunPhase::Completed.is_active());
        assert!(!RunPhase::Stopped.is_active());
    }
}
