use flume::{Receiver, Sender};
use std::time::Duration;

use super::{
    logs::{LogEntry, LogLevel},
    orchestrator::RunSummary,
};
use crate::protocol::link::LinkId;

/// Messages sent from the UI to the core session.
#[derive(Debug, Clone, PartialEq)]
pub enum UiToCore {
    Open(LinkId),
    Close(LinkId),
    /// Send one ad-hoc line from the given link.
    Send(LinkId, String),
    StartTest,
    /// Pause when running, resume when paused.
    TogglePause,
    StopTest,
    /// Graceful shutdown request.
    Quit,
}

/// Messages sent from the core back to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreToUi {
    /// Append to the global log.
    Log(LogEntry),
    /// Last line received on a link.
    Received { link: LinkId, line: String },
    /// Blank the last-received display of a link.
    ClearReceived(LinkId),
    LinkStatus { link: LinkId, open: bool },
    /// Live `Test Time` label.
    TestTime(Duration),
    /// Pause button label state.
    Paused(bool),
    /// Final report of a finished run.
    Summary(RunSummary),
    /// Core is requesting UI to quit.
    Quit,
}

/// Simple holder passed into UI loop containing the receiving side from core and the sending side to core.
#[derive(Debug, Clone)]
pub struct Bus {
    pub core_rx: Receiver<CoreToUi>,
    pub ui_tx: Sender<UiToCore>,
}

impl Bus {
    pub fn new(core_rx: Receiver<CoreToUi>, ui_tx: Sender<UiToCore>) -> Self {
        Self { core_rx, ui_tx }
    }
}

/// The single dispatch point for everything the UI displays.
///
/// Link reader threads, the run task and the session all write through a
/// clone of this sink; the UI applies the events in order on its own thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<CoreToUi>,
}

impl EventSink {
    pub fn new(tx: Sender<CoreToUi>) -> Self {
        Self { tx }
    }

    /// A sink with its receiving end.
    pub fn channel() -> (Self, Receiver<CoreToUi>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: CoreToUi) {
        if self.tx.send(event).is_err() {
            log::debug!("UI receiver dropped, event discarded");
        }
    }

    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => log::info!("{}", entry.message),
            LogLevel::Warning => log::warn!("{}", entry.message),
            LogLevel::Error => log::error!("{}", entry.message),
        }
        self.emit(CoreToUi::Log(entry));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogEntry::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogEntry::error(message));
    }

    pub fn received(&self, link: LinkId, line: impl Into<String>) {
        self.emit(CoreToUi::Received {
            link,
            line: line.into(),
        });
    }

    pub fn clear_received(&self, link: LinkId) {
        self.emit(CoreToUi::ClearReceived(link));
    }

    pub fn link_status(&self, link: LinkId, open: bool) {
        self.emit(CoreToUi::LinkStatus { link, open });
    }

    pub fn test_time(&self, elapsed: Duration) {
        self.emit(CoreToUi::TestTime(elapsed));
    }

    pub fn paused(&self, paused: bool) {
        self.emit(CoreToUi::Paused(paused));
    }

    pub fn summary(&self, summary: RunSummary) {
        self.emit(CoreToUi::Summary(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_preserves_event_order() {
        let (sink, rx) = EventSink::channel();
        sink.clear_received(LinkId::B);
        sink.info("Port1 sent: hi");
        sink.received(LinkId::B, "hi");

        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], CoreToUi::ClearReceived(LinkId::B));
        assert!(matches!(&events[1], CoreToUi::Log(e) if e.message == "Port1 sent: hi"));
        assert_eq!(
            events[2],
            CoreToUi::Received {
                link: LinkId::B,
                line: "hi".to_string()
            }
        );
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.error("nobody listening");
    }
}
