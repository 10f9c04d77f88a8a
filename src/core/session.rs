/// Application controller shared by every front end
///
/// Owns both links with their relays and the test orchestrator, executes the
/// manual port operations and routes test commands. Front ends talk to it
/// through [`UiToCore`] commands and observe it through the [`EventSink`].
use std::sync::Arc;

use super::{
    bus::{CoreToUi, EventSink, UiToCore},
    orchestrator::{RunHandle, RunSnapshot, TestOrchestrator, TestPlan},
    relay::PassThroughRelay,
};
use crate::protocol::link::{Link, LinkId};

pub struct Session {
    relay_a: Arc<PassThroughRelay>,
    relay_b: Arc<PassThroughRelay>,
    sink: EventSink,
    orchestrator: TestOrchestrator,
}

impl Session {
    /// Build a session around two links. Both relays start enabled.
    pub fn new(link_a: Arc<dyn Link>, link_b: Arc<dyn Link>, sink: EventSink, plan: TestPlan) -> Self {
        let relay_a = Arc::new(PassThroughRelay::new(link_a, sink.clone()));
        let relay_b = Arc::new(PassThroughRelay::new(link_b, sink.clone()));
        relay_a.enable();
        relay_b.enable();

        let orchestrator =
            TestOrchestrator::new(Arc::clone(&relay_a), Arc::clone(&relay_b), sink.clone(), plan);
        Self {
            relay_a,
            relay_b,
            sink,
            orchestrator,
        }
    }

    pub fn relay(&self, id: LinkId) -> &Arc<PassThroughRelay> {
        match id {
            LinkId::A => &self.relay_a,
            LinkId::B => &self.relay_b,
        }
    }

    pub fn link(&self, id: LinkId) -> &Arc<dyn Link> {
        self.relay(id).link()
    }

    pub fn orchestrator(&self) -> &TestOrchestrator {
        &self.orchestrator
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.orchestrator.snapshot()
    }

    /// Open a link. Already-open links are left alone.
    pub fn open(&self, id: LinkId) {
        let link = self.link(id);
        if link.is_open() {
            return;
        }
        match link.open() {
            Ok(()) => {
                self.sink.link_status(id, true);
                self.sink.info(format!("{id} opened."));
            }
            Err(err) => self.sink.error(format!("Error opening {id}: {err}")),
        }
    }

    /// Close a link. Already-closed links are left alone.
    pub fn close(&self, id: LinkId) {
        let link = self.link(id);
        if !link.is_open() {
            return;
        }
        match link.close() {
            Ok(()) => {
                self.sink.link_status(id, false);
                self.sink.info(format!("{id} closed."));
            }
            Err(err) => self.sink.error(format!("Error closing {id}: {err}")),
        }
    }

    /// Send one ad-hoc line.
    pub fn send(&self, id: LinkId, text: &str) {
        let link = self.link(id);
        if !link.is_open() {
            self.sink.warning(format!("{id} is not open."));
            return;
        }
        match link.write_line(text) {
            Ok(()) => self.sink.info(format!("{id} sent: {text}")),
            Err(err) => self.sink.error(format!("Error sending from {id}: {err}")),
        }
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// `None` when a run is already active or the links could not be opened;
    /// both cases have already been reported through the sink.
    pub fn start_test(&self) -> Option<RunHandle> {
        match self.orchestrator.start() {
            Ok(handle) => handle,
            Err(err) => {
                log::debug!("Test start failed: {err}");
                None
            }
        }
    }

    pub fn toggle_pause(&self) -> Option<bool> {
        self.orchestrator.toggle_pause()
    }

    pub fn stop_test(&self) -> bool {
        self.orchestrator.stop()
    }

    /// Apply one command. Returns `false` once the session has shut down.
    pub fn handle(&self, command: UiToCore) -> bool {
        match command {
            UiToCore::Open(id) => self.open(id),
            UiToCore::Close(id) => self.close(id),
            UiToCore::Send(id, text) => self.send(id, &text),
            UiToCore::StartTest => {
                self.start_test();
            }
            UiToCore::TogglePause => {
                if self.toggle_pause().is_none() {
                    log::debug!("Pause ignored, no test is running");
                }
            }
            UiToCore::StopTest => {
                if !self.stop_test() {
                    log::debug!("Stop ignored, no test is running");
                }
            }
            UiToCore::Quit => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Process commands until `Quit` arrives or every sender is gone.
    pub async fn run(self: Arc<Self>, commands: flume::Receiver<UiToCore>) {
        while let Ok(command) = commands.recv_async().await {
            if !self.handle(command) {
                return;
            }
        }
        log::info!("Command channel closed, shutting down session");
        self.shutdown();
    }

    /// Stop any run, close both links and tell the UI to quit.
    pub fn shutdown(&self) {
        self.stop_test();
        for id in [LinkId::A, LinkId::B] {
            self.close(id);
        }
        self.sink.emit(CoreToUi::Quit);
    }
}
