use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use super::{LinkError, LinkId};

/// Handle returned by [`Notifier::subscribe`] and [`Notifier::subscribe_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;
type OnceListener = Box<dyn FnOnce() + Send>;

enum Subscriber {
    Persistent(SubscriptionId, Listener),
    Once(SubscriptionId, OnceListener),
}

impl Subscriber {
    fn id(&self) -> SubscriptionId {
        match self {
            Subscriber::Persistent(id, _) | Subscriber::Once(id, _) => *id,
        }
    }
}

/// Data-available subscription hub.
///
/// Listeners run on whatever thread delivered the line, outside of the
/// notifier's lock, so they may subscribe or unsubscribe freely.
pub struct Notifier {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn allocate(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a listener that fires on every notification until removed.
    pub fn subscribe(&self, listener: Arc<dyn Fn() + Send + Sync>) -> SubscriptionId {
        let id = self.allocate();
        self.subscribers
            .lock()
            .push(Subscriber::Persistent(id, listener));
        id
    }

    /// Register a listener that fires on the next notification only.
    ///
    /// The subscription is removed before the listener runs, so it can never
    /// observe a second line.
    pub fn subscribe_once<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.allocate();
        self.subscribers
            .lock()
            .push(Subscriber::Once(id, Box::new(listener)));
        id
    }

    /// Remove a subscription. Returns `false` if it already fired or was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id() != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Fire every current subscriber once. Returns how many listeners ran.
    pub fn notify(&self) -> usize {
        let mut persistent: Vec<Listener> = Vec::new();
        let mut once: Vec<OnceListener> = Vec::new();
        {
            let mut subscribers = self.subscribers.lock();
            let mut kept = Vec::with_capacity(subscribers.len());
            for subscriber in subscribers.drain(..) {
                match subscriber {
                    Subscriber::Persistent(id, listener) => {
                        persistent.push(Arc::clone(&listener));
                        kept.push(Subscriber::Persistent(id, listener));
                    }
                    Subscriber::Once(_, listener) => once.push(listener),
                }
            }
            *subscribers = kept;
        }

        let fired = persistent.len() + once.len();
        for listener in persistent {
            listener();
        }
        for listener in once {
            listener();
        }
        fired
    }
}

/// Inbound line queue shared by link implementations and their delivery thread.
pub struct LinkCore {
    id: LinkId,
    inbound: Mutex<VecDeque<String>>,
    delivery: Mutex<()>,
    notifier: Notifier,
}

impl LinkCore {
    pub fn new(id: LinkId) -> Arc<Self> {
        Arc::new(Self {
            id,
            inbound: Mutex::new(VecDeque::new()),
            delivery: Mutex::new(()),
            notifier: Notifier::new(),
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Queue one complete line and announce it.
    ///
    /// A line nobody is subscribed to is dropped right away so that a later
    /// subscriber never reads it as if it were fresh.
    pub fn deliver(&self, line: String) {
        let _serialized = self.delivery.lock();
        self.inbound.lock().push_back(line);
        if self.notifier.notify() == 0 {
            if let Some(dropped) = self.inbound.lock().pop_back() {
                log::debug!("{}: dropping unclaimed line {dropped:?}", self.id);
            }
        }
    }

    pub fn read_line(&self) -> Result<String, LinkError> {
        self.inbound
            .lock()
            .pop_front()
            .ok_or(LinkError::NoLine { link: self.id })
    }

    pub fn clear(&self) {
        self.inbound.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn once_subscription_fires_a_single_time() {
        let notifier = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        notifier.subscribe_once(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(notifier.notify(), 1);
        assert_eq!(notifier.notify(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_persistent_listener() {
        let notifier = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = notifier.subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        notifier.notify();
        notifier.notify();
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unclaimed_lines_are_not_replayed() {
        let core = LinkCore::new(LinkId::B);
        core.deliver("stale".to_string());
        assert!(core.read_line().is_err());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reader = Arc::clone(&core);
        core.notifier().subscribe(Arc::new(move || {
            if let Ok(line) = reader.read_line() {
                sink.lock().push(line);
            }
        }));
        core.deliver("fresh".to_string());

        assert_eq!(*seen.lock(), vec!["fresh".to_string()]);
        assert!(matches!(
            core.read_line(),
            Err(LinkError::NoLine { link: LinkId::B })
        ));
    }
}
