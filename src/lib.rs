//! twinport: loopback tester for a pair of serial ports
//!
//! Two links are cross-wired (null modem or a loopback rig). The tester sends
//! 25 numbered probes from the first link to the second and 25 back the other
//! way, checks every echo, and reports per-phase and overall success rates
//! together with the elapsed test time.
//!
//! The `core` module holds the UI-independent logic (relays, probe exchange,
//! orchestrator, session); `protocol` holds the link abstraction with its
//! serial and in-memory implementations. The console front end and the boot
//! helpers live in separate, hidden modules.

#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use crate::core::{RunSummary, Session, TestOrchestrator, TestPlan};
pub use crate::protocol::link::{Link, LinkError, LinkId, MemoryLink, SerialLink, Wire};
