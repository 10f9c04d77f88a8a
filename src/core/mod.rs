/// Core of the loopback tester
///
/// This module contains the UI-independent logic:
/// - Message bus and event sink for UI-core communication
/// - Pass-through relays for received lines
/// - Single probe exchanges and the two-phase test orchestrator
/// - Stopwatch and test time ticker
/// - User-visible log entries
/// - The session controller tying it all together
pub mod bus;
pub mod clock;
pub mod exchange;
pub mod logs;
pub mod orchestrator;
pub mod relay;
pub mod session;

pub use bus::{Bus, CoreToUi, EventSink, UiToCore};
pub use exchange::{Direction, ExchangeError, ExchangeOutcome, Probe, ProbeExchange};
pub use orchestrator::{
    PhaseResult, RunError, RunHandle, RunOutcome, RunPhase, RunSnapshot, RunSummary,
    TestOrchestrator, TestPlan,
};
pub use relay::PassThroughRelay;
pub use session::Session;
