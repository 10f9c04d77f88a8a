//! Line-oriented duplex links
//!
//! A [`Link`] is the black-box channel the test harness drives: it can be
//! opened and closed, written one line at a time, and it announces every
//! complete inbound line through its [`Notifier`]. Whoever is subscribed at
//! that moment is expected to call [`Link::read_line`] exactly once.

pub mod memory;
pub mod notify;
pub mod serial;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use strum::EnumIter;

pub use memory::{MemoryLink, Wire};
pub use notify::{LinkCore, Notifier, SubscriptionId};
pub use serial::{SerialConfig, SerialLink};

/// Identity of one of the two links under test.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    strum::Display,
    Serialize,
    Deserialize,
)]
pub enum LinkId {
    #[strum(to_string = "Port1")]
    A,
    #[strum(to_string = "Port2")]
    B,
}

impl LinkId {
    /// The opposite end of the pair.
    pub fn peer(self) -> Self {
        match self {
            LinkId::A => LinkId::B,
            LinkId::B => LinkId::A,
        }
    }

    /// Parse the short console form (`a`, `b`, `1`, `2`, `port1`, ...).
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "a" | "1" | "port1" => Some(LinkId::A),
            "b" | "2" | "port2" => Some(LinkId::B),
            _ => None,
        }
    }
}

/// Failures reported by a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LinkError {
    /// The underlying port is unavailable or busy.
    #[display("{reason}")]
    Open { link: LinkId, reason: String },
    #[display("{link} is not open")]
    NotOpen { link: LinkId },
    /// Read or write failed on an open port.
    #[display("{reason}")]
    Io { link: LinkId, reason: String },
    #[display("no complete line buffered on {link}")]
    NoLine { link: LinkId },
}

impl LinkError {
    pub fn link(&self) -> LinkId {
        match self {
            LinkError::Open { link, .. }
            | LinkError::NotOpen { link }
            | LinkError::Io { link, .. }
            | LinkError::NoLine { link } => *link,
        }
    }
}

/// Duplex line channel with a data-available notification.
pub trait Link: Send + Sync {
    fn id(&self) -> LinkId;

    /// Open the link. Opening an already open link is a no-op.
    fn open(&self) -> Result<(), LinkError>;

    /// Close the link. Closing a closed link is a no-op.
    fn close(&self) -> Result<(), LinkError>;

    fn is_open(&self) -> bool;

    /// Write `text` followed by a newline.
    fn write_line(&self, text: &str) -> Result<(), LinkError>;

    /// Pop the oldest complete inbound line.
    fn read_line(&self) -> Result<String, LinkError>;

    /// Data-available subscription hub for this link.
    fn notifier(&self) -> &Notifier;
}
