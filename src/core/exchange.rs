//! One probe request/response round
//!
//! A [`ProbeExchange`] sends a labeled probe from one link and waits for the
//! same text to arrive on the other. While it waits, the destination's
//! pass-through relay is detached and a one-shot waiter owns the next inbound
//! line.

use derive_more::{Display, Error};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{bus::EventSink, relay::PassThroughRelay};
use crate::protocol::link::{Link, LinkError, LinkId, Notifier, SubscriptionId};

/// Bound on how long a step waits for its echo.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    pub fn source(self) -> LinkId {
        match self {
            Direction::AToB => LinkId::A,
            Direction::BToA => LinkId::B,
        }
    }

    pub fn destination(self) -> LinkId {
        self.source().peer()
    }

    /// Phase 1 always sends A→B, phase 2 always B→A.
    pub fn phase_number(self) -> u8 {
        match self {
            Direction::AToB => 1,
            Direction::BToA => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    step: u32,
    direction: Direction,
    payload: String,
}

impl Probe {
    pub fn new(step: u32, direction: Direction) -> Self {
        Self {
            step,
            direction,
            payload: format!("TEST1234_STEP_{step}"),
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// `Phase N - Step i` prefix used by every log line about this probe.
    fn label(&self) -> String {
        format!("Phase {} - Step {}", self.direction.phase_number(), self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub probe: Probe,
    pub received: Option<String>,
    pub passed: bool,
    pub timed_out: bool,
}

/// Why an exchange produced no outcome.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ExchangeError {
    /// The run was stopped while the step was in flight.
    #[display("cancelled")]
    Cancelled,
    #[display("{_0}")]
    Link(#[error(source)] LinkError),
}

impl From<LinkError> for ExchangeError {
    fn from(err: LinkError) -> Self {
        ExchangeError::Link(err)
    }
}

/// Removes a pending one-shot waiter that never fired.
struct WaiterGuard<'a> {
    notifier: &'a Notifier,
    id: SubscriptionId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.id);
    }
}

pub struct ProbeExchange {
    sink: EventSink,
    timeout: Duration,
}

impl ProbeExchange {
    pub fn new(sink: EventSink, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Send `probe` from `source` and wait for it on `destination`'s link.
    ///
    /// The destination relay is re-enabled on every exit path, including
    /// cancellation and the future being dropped mid-wait.
    pub async fn run(
        &self,
        source: &Arc<dyn Link>,
        destination: &PassThroughRelay,
        probe: &Probe,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        let label = probe.label();
        let dest_link = Arc::clone(destination.link());
        let dest_id = dest_link.id();

        self.sink.clear_received(dest_id);
        let relay_guard = destination.detach();

        let (tx, rx) = oneshot::channel::<Result<String, LinkError>>();
        let reader = Arc::clone(&dest_link);
        let display = self.sink.clone();
        let waiter_id = dest_link.notifier().subscribe_once(move || {
            let result = reader.read_line();
            if let Ok(line) = &result {
                display.received(reader.id(), line.clone());
            }
            let _ = tx.send(result);
        });
        let waiter_guard = WaiterGuard {
            notifier: dest_link.notifier(),
            id: waiter_id,
        };

        source.write_line(probe.payload())?;
        self.sink
            .info(format!("{label}: Sent from {}: {}", source.id(), probe.payload()));

        let (received, timed_out) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
            response = rx => match response {
                Ok(Ok(line)) => (Some(line), false),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    return Err(ExchangeError::Link(LinkError::Io {
                        link: dest_id,
                        reason: "response waiter dropped".to_string(),
                    }))
                }
            },
            _ = tokio::time::sleep(self.timeout) => (None, true),
        };

        drop(waiter_guard);
        drop(relay_guard);

        let passed = received
            .as_deref()
            .is_some_and(|line| line.trim() == probe.payload().trim());
        if timed_out {
            self.sink
                .warning(format!("{label}: Test timed out waiting for response."));
        }
        self.sink.info(format!(
            "{label} result: {}",
            if passed { "Passed" } else { "Failed" }
        ));

        Ok(ExchangeOutcome {
            probe: probe.clone(),
            received,
            passed,
            timed_out,
        })
    }
}
