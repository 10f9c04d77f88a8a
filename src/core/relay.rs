//! Pass-through forwarding of received lines
//!
//! Outside of a probe exchange every line a link receives is shown in that
//! link's receive display and appended to the global log. A probe exchange
//! detaches the relay from its destination for the duration of one step with
//! a [`RelayDetachGuard`], which re-attaches it when dropped.

use parking_lot::Mutex;
use std::sync::Arc;

use super::bus::EventSink;
use crate::protocol::link::{Link, LinkId, SubscriptionId};

pub struct PassThroughRelay {
    link: Arc<dyn Link>,
    sink: EventSink,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl PassThroughRelay {
    /// Create a relay for `link`. It starts disabled.
    pub fn new(link: Arc<dyn Link>, sink: EventSink) -> Self {
        Self {
            link,
            sink,
            subscription: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    pub fn link_id(&self) -> LinkId {
        self.link.id()
    }

    /// Start forwarding. Idempotent.
    pub fn enable(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }
        let link = Arc::clone(&self.link);
        let sink = self.sink.clone();
        *subscription = Some(self.link.notifier().subscribe(Arc::new(move || {
            let id = link.id();
            match link.read_line() {
                Ok(line) => {
                    sink.received(id, line.clone());
                    sink.info(format!("{id} received: {line}"));
                }
                Err(err) => sink.error(format!("Error reading {id}: {err}")),
            }
        })));
    }

    /// Stop forwarding. Idempotent.
    ///
    /// A notification that is already running may still finish, nothing new
    /// is forwarded once this returns.
    pub fn disable(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.link.notifier().unsubscribe(id);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Disable now, enable when the guard drops.
    pub fn detach(&self) -> RelayDetachGuard<'_> {
        self.disable();
        RelayDetachGuard { relay: self }
    }
}

impl Drop for PassThroughRelay {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Keeps a relay detached for its lifetime.
///
/// Dropping restores the relay even when the owning future is cancelled or
/// unwinds with an error.
pub struct RelayDetachGuard<'a> {
    relay: &'a PassThroughRelay,
}

impl Drop for RelayDetachGuard<'_> {
    fn drop(&mut self) {
        self.relay.enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::bus::CoreToUi, protocol::link::MemoryLink};

    fn received_lines(rx: &flume::Receiver<CoreToUi>) -> Vec<String> {
        rx.drain()
            .filter_map(|event| match event {
                CoreToUi::Received { line, .. } => Some(line),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn forwards_each_line_once_to_display_and_log() {
        let (a, b) = MemoryLink::pair();
        a.open().unwrap();
        b.open().unwrap();
        let (sink, rx) = EventSink::channel();
        let relay = PassThroughRelay::new(b.clone(), sink);
        relay.enable();
        relay.enable();

        a.write_line("hello").unwrap();

        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            CoreToUi::Received {
                link: LinkId::B,
                line: "hello".to_string()
            }
        );
        assert!(matches!(&events[1], CoreToUi::Log(e) if e.message == "Port2 received: hello"));
    }

    #[test]
    fn disabled_relay_does_not_replay_on_enable() {
        let (a, b) = MemoryLink::pair();
        a.open().unwrap();
        b.open().unwrap();
        let (sink, rx) = EventSink::channel();
        let relay = PassThroughRelay::new(b.clone(), sink);
        relay.enable();

        relay.disable();
        a.write_line("while detached").unwrap();
        relay.enable();
        a.write_line("after").unwrap();

        assert_eq!(received_lines(&rx), vec!["after".to_string()]);
    }

    #[test]
    fn detach_guard_always_reenables() {
        let (_a, b) = MemoryLink::pair();
        let (sink, _rx) = EventSink::channel();
        let relay = PassThroughRelay::new(b.clone(), sink);
        relay.enable();
        {
            let _guard = relay.detach();
            assert!(!relay.is_enabled());
            assert_eq!(b.notifier().subscriber_count(), 0);
        }
        assert!(relay.is_enabled());

        relay.disable();
        drop(relay.detach());
        assert!(relay.is_enabled());
        assert_eq!(b.notifier().subscriber_count(), 1);
    }
}
