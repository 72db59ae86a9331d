use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{ReentrantMutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::stream::frame::SharedFrame;

/// Deliveries slower than this are reported.
const SLOW_DELIVERY: Duration = Duration::from_millis(50);

/// Error a consumer reports back for a single delivery.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The consumer will never accept frames again; the hub drops it.
    #[error("sink is closed")]
    Closed,

    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// Errors returned by hub registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("broadcast hub is closed")]
    Closed,
}

/// Anything that can receive published frames: metrics, previews,
/// downstream pipelines or another hub.
///
/// `deliver` runs synchronously on the producer's thread. A consumer that
/// needs to do slow work must hand the frame off (see `FrameRing`).
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: &SharedFrame) -> Result<(), SinkError>;

    /// Called by a hub that exclusively owns this sink when the hub closes.
    fn close(&self) {}

    /// Name used in log messages.
    fn label(&self) -> &str {
        "sink"
    }
}

/// Registry identity of a consumer. Two handles are the same consumer when
/// they point at the same allocation.
pub type SinkHandle = Arc<dyn FrameSink>;

fn same_sink(a: &SinkHandle, b: &SinkHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

struct Subscriber {
    sink: SinkHandle,
    owned: bool,
    /// Held for the duration of each delivery. Unregistering takes it too,
    /// which is what rules out a delivery after `unregister` returns.
    gate: ReentrantMutex<()>,
    active: AtomicBool,
}

impl Subscriber {
    fn deactivate(&self) {
        let _gate = self.gate.lock();
        self.active.store(false, Ordering::Release);
    }
}

/// Multicast fan-out of frames to every registered consumer.
///
/// The registry is copy-on-write: `publish` clones the current subscriber
/// list under a short read lock and delivers without holding it, so
/// registration never waits for an in-flight publish and vice versa.
pub struct BroadcastHub {
    label: String,
    subscribers: RwLock<Arc<Vec<Arc<Subscriber>>>>,
    closed: AtomicBool,
    published: AtomicU64,
}

impl BroadcastHub {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }

    /// Add a consumer that receives every subsequent `publish`.
    ///
    /// Returns `Ok(false)` if the consumer is already registered.
    pub fn register(&self, sink: SinkHandle) -> Result<bool, StreamError> {
        self.insert(sink, false)
    }

    /// Like `register`, but the hub takes exclusive ownership: closing the
    /// hub also closes the sink.
    pub fn register_owned(&self, sink: SinkHandle) -> Result<bool, StreamError> {
        self.insert(sink, true)
    }

    fn insert(&self, sink: SinkHandle, owned: bool) -> Result<bool, StreamError> {
        let mut subscribers = self.subscribers.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        if subscribers.iter().any(|s| same_sink(&s.sink, &sink)) {
            debug!("{}: '{}' already registered", self.label, sink.label());
            return Ok(false);
        }

        let mut next = Vec::with_capacity(subscribers.len() + 1);
        next.extend(subscribers.iter().cloned());
        debug!("{}: registered '{}'", self.label, sink.label());
        next.push(Arc::new(Subscriber {
            sink,
            owned,
            gate: ReentrantMutex::new(()),
            active: AtomicBool::new(true),
        }));
        *subscribers = Arc::new(next);
        Ok(true)
    }

    /// Remove a consumer. Idempotent; returns whether it was registered.
    ///
    /// If a delivery to this consumer is in flight on another thread, waits
    /// for it to finish. Once this returns the consumer receives nothing
    /// more from this hub.
    pub fn unregister(&self, sink: &SinkHandle) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write();
            let Some(pos) = subscribers.iter().position(|s| same_sink(&s.sink, sink)) else {
                return false;
            };
            let mut next: Vec<Arc<Subscriber>> = subscribers.iter().cloned().collect();
            let removed = next.remove(pos);
            *subscribers = Arc::new(next);
            removed
        };
        removed.deactivate();
        debug!("{}: unregistered '{}'", self.label, sink.label());
        true
    }

    /// Deliver `frame` to a snapshot of the current consumers.
    ///
    /// Consumer errors and panics are logged and never reach the caller.
    /// Returns the number of consumers that accepted the frame.
    pub fn publish(&self, frame: SharedFrame) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let snapshot = Arc::clone(&self.subscribers.read());
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut finished: Vec<SinkHandle> = Vec::new();
        for subscriber in snapshot.iter() {
            let _gate = subscriber.gate.lock();
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }

            let started = Instant::now();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.sink.deliver(&frame)));
            let elapsed = started.elapsed();
            if elapsed > SLOW_DELIVERY {
                warn!(
                    "{}: delivery to '{}' took {}ms",
                    self.label,
                    subscriber.sink.label(),
                    elapsed.as_millis()
                );
            }

            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(SinkError::Closed)) => {
                    debug!(
                        "{}: '{}' closed, dropping it",
                        self.label,
                        subscriber.sink.label()
                    );
                    finished.push(Arc::clone(&subscriber.sink));
                }
                Ok(Err(e)) => {
                    warn!(
                        "{}: delivery to '{}' failed: {e}",
                        self.label,
                        subscriber.sink.label()
                    );
                }
                Err(_) => {
                    error!(
                        "{}: '{}' panicked during delivery",
                        self.label,
                        subscriber.sink.label()
                    );
                }
            }
        }

        for sink in &finished {
            self.unregister(sink);
        }
        delivered
    }

    /// Stop accepting registrations and deliver nothing further.
    ///
    /// Owned consumers are closed; others are only detached. Idempotent.
    pub fn close(&self) {
        let drained = {
            let mut subscribers = self.subscribers.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *subscribers)
        };

        for subscriber in drained.iter() {
            subscriber.deactivate();
            if subscriber.owned {
                subscriber.sink.close();
            }
        }
        debug!("{}: closed, {} consumer(s) detached", self.label, drained.len());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl FrameSink for BroadcastHub {
    fn deliver(&self, frame: &SharedFrame) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.publish(Arc::clone(frame));
        Ok(())
    }

    fn close(&self) {
        BroadcastHub::close(self);
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        self.close();
    }
}
