use parking_lot::{Mutex, RwLock};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
    time::Duration,
};

use super::{Link, LinkCore, LinkError, LinkId, Notifier};

/// What the simulated wire does with a line written into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    /// Deliver the line verbatim to the peer.
    Echo,
    /// Swallow the line.
    Silent,
    /// Deliver a mangled copy of the line.
    Corrupt,
}

/// In-memory [`Link`], wired null-modem style to a peer created by [`MemoryLink::pair`].
pub struct MemoryLink {
    core: Arc<LinkCore>,
    peer: RwLock<Weak<MemoryLink>>,
    open: AtomicBool,
    wire: Mutex<Wire>,
    latency: Mutex<Option<Duration>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_open: Mutex<Option<String>>,
    written: AtomicUsize,
}

impl MemoryLink {
    fn new(id: LinkId) -> Arc<Self> {
        Arc::new(Self {
            core: LinkCore::new(id),
            peer: RwLock::new(Weak::new()),
            open: AtomicBool::new(false),
            wire: Mutex::new(Wire::Echo),
            latency: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_open: Mutex::new(None),
            written: AtomicUsize::new(0),
        })
    }

    /// Two closed links, `A` and `B`, each delivering its writes to the other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Self::new(LinkId::A);
        let b = Self::new(LinkId::B);
        *a.peer.write() = Arc::downgrade(&b);
        *b.peer.write() = Arc::downgrade(&a);
        (a, b)
    }

    /// Behaviour of the wire leaving this link.
    pub fn set_wire(&self, wire: Wire) {
        *self.wire.lock() = wire;
    }

    /// Deliver on a background thread after `latency` instead of inline.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `read_line` fail. The pending line is still consumed.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `open` calls fail with `reason` until cleared with `None`.
    pub fn fail_open(&self, reason: Option<&str>) {
        *self.fail_open.lock() = reason.map(str::to_string);
    }

    /// Number of lines successfully written from this end.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    /// Inject a line as if it had been received from the wire.
    pub fn inject(&self, line: impl Into<String>) {
        if self.is_open() {
            self.core.deliver(line.into());
        }
    }
}

impl Link for MemoryLink {
    fn id(&self) -> LinkId {
        self.core.id()
    }

    fn open(&self) -> Result<(), LinkError> {
        if let Some(reason) = self.fail_open.lock().clone() {
            return Err(LinkError::Open {
                link: self.core.id(),
                reason,
            });
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), LinkError> {
        self.open.store(false, Ordering::SeqCst);
        self.core.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write_line(&self, text: &str) -> Result<(), LinkError> {
        let id = self.core.id();
        if !self.is_open() {
            return Err(LinkError::NotOpen { link: id });
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::Io {
                link: id,
                reason: "simulated write failure".to_string(),
            });
        }
        self.written.fetch_add(1, Ordering::SeqCst);

        let line = match &*self.wire.lock() {
            Wire::Echo => text.to_string(),
            Wire::Silent => return Ok(()),
            Wire::Corrupt => text.chars().rev().collect(),
        };
        let Some(peer) = self.peer.read().upgrade() else {
            return Ok(());
        };

        match *self.latency.lock() {
            None => peer.inject(line),
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    peer.inject(line);
                });
            }
        }
        Ok(())
    }

    fn read_line(&self) -> Result<String, LinkError> {
        let line = self.core.read_line()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            log::debug!("{}: discarding {line:?} on simulated read failure", self.core.id());
            return Err(LinkError::Io {
                link: self.core.id(),
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(line)
    }

    fn notifier(&self) -> &Notifier {
        self.core.notifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(link: &Arc<MemoryLink>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reader = Arc::clone(link);
        link.notifier().subscribe(Arc::new(move || {
            if let Ok(line) = reader.read_line() {
                sink.lock().push(line);
            }
        }));
        seen
    }

    #[test]
    fn echo_wire_delivers_to_peer_only_when_open() {
        let (a, b) = MemoryLink::pair();
        let seen = collect(&b);
        a.open().unwrap();

        a.write_line("dropped, B closed").unwrap();
        b.open().unwrap();
        a.write_line("hello").unwrap();

        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
        assert_eq!(a.written(), 2);
    }

    #[test]
    fn silent_and_corrupt_wires() {
        let (a, b) = MemoryLink::pair();
        let seen = collect(&b);
        a.open().unwrap();
        b.open().unwrap();

        a.set_wire(Wire::Silent);
        a.write_line("lost").unwrap();
        a.set_wire(Wire::Corrupt);
        a.write_line("abc").unwrap();

        assert_eq!(*seen.lock(), vec!["cba".to_string()]);
    }

    #[test]
    fn failures_are_reported_as_link_errors() {
        let (a, _b) = MemoryLink::pair();
        assert_eq!(a.write_line("x"), Err(LinkError::NotOpen { link: LinkId::A }));

        a.fail_open(Some("port busy"));
        assert!(matches!(a.open(), Err(LinkError::Open { .. })));
        a.fail_open(None);
        a.open().unwrap();

        a.fail_writes(true);
        assert!(matches!(a.write_line("x"), Err(LinkError::Io { .. })));
    }

    #[test]
    fn read_failure_consumes_the_pending_line() {
        let (a, b) = MemoryLink::pair();
        a.open().unwrap();
        b.open().unwrap();
        b.fail_reads(true);

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let reader = Arc::clone(&b);
        b.notifier().subscribe(Arc::new(move || {
            sink.lock().push(reader.read_line());
        }));
        a.write_line("first").unwrap();
        b.fail_reads(false);
        a.write_line("second").unwrap();

        let results = results.lock();
        assert!(matches!(
            results[0],
            Err(LinkError::Io { link: LinkId::B, .. })
        ));
        assert_eq!(results[1], Ok("second".to_string()));
    }
}
