//! Change-reactive configuration watching.
//!
//! The configuration is an immutable snapshot. Each update replaces the
//! snapshot, and every registered watch entry diffs its projections (named
//! extractor functions) between the value it last saw and the new snapshot.
//! An entry whose projections changed fires its callback exactly once per
//! update and refreshes every one of its baselines.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error};

/// Type-erased projection with its stored baseline.
trait Tracked<C>: Send {
    fn name(&self) -> &str;
    /// Whether the value for `config` differs from the baseline.
    fn changed(&self, config: &C) -> bool;
    /// Store the value for `config` as the new baseline.
    fn refresh(&mut self, config: &C);
}

struct Field<C, T, F> {
    name: String,
    extract: F,
    last: Option<T>,
    _config: PhantomData<fn(&C)>,
}

impl<C, T, F> Tracked<C> for Field<C, T, F>
where
    T: PartialEq + Send,
    F: Fn(&C) -> T + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn changed(&self, config: &C) -> bool {
        match &self.last {
            Some(last) => *last != (self.extract)(config),
            None => true,
        }
    }

    fn refresh(&mut self, config: &C) {
        self.last = Some((self.extract)(config));
    }
}

/// A named pure function from the whole configuration to a comparable value.
pub struct Projection<C> {
    inner: Box<dyn Tracked<C>>,
}

impl<C: 'static> Projection<C> {
    pub fn new<T, F>(name: impl Into<String>, extract: F) -> Self
    where
        T: PartialEq + Send + 'static,
        F: Fn(&C) -> T + Send + 'static,
    {
        Self {
            inner: Box::new(Field {
                name: name.into(),
                extract,
                last: None,
                _config: PhantomData,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

type Callback<C> = Box<dyn Fn(&C) + Send + Sync>;

struct WatchEntry<C> {
    id: u64,
    label: String,
    projections: Mutex<Vec<Projection<C>>>,
    /// Held while the callback runs; `unregister` takes it as well.
    gate: ReentrantMutex<()>,
    active: AtomicBool,
    callback: Callback<C>,
}

impl<C> WatchEntry<C> {
    /// Diff against `config`; on any change refresh every baseline.
    fn diff_and_refresh(&self, config: &C) -> Vec<String> {
        let mut projections = self.projections.lock();
        let changed: Vec<String> = projections
            .iter()
            .filter(|p| p.inner.changed(config))
            .map(|p| p.inner.name().to_string())
            .collect();
        if !changed.is_empty() {
            projections.iter_mut().for_each(|p| p.inner.refresh(config));
        }
        changed
    }

    fn invoke(&self, config: &C) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(config)));
        if outcome.is_err() {
            error!("watch '{}' callback panicked", self.label);
        }
    }
}

/// Holds the current configuration snapshot and the registered watch
/// entries. Shared via `Arc`; every method may be called from any thread,
/// including re-entrantly from inside a watch callback.
pub struct ConfigWatcher<C> {
    current: RwLock<Arc<C>>,
    entries: Mutex<Vec<Arc<WatchEntry<C>>>>,
    /// Serialises updates and registrations against each other.
    update_gate: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl<C: Send + Sync + 'static> ConfigWatcher<C> {
    pub fn new(initial: C) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(Arc::new(initial)),
            entries: Mutex::new(Vec::new()),
            update_gate: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<C> {
        Arc::clone(&self.current.read())
    }

    /// Number of registered watch entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `callback` to run whenever any of `projections` changes.
    ///
    /// Baselines are taken from the current snapshot. With
    /// `fire_immediately` the callback also runs once, synchronously, before
    /// this returns.
    pub fn watch<F>(
        self: &Arc<Self>,
        label: impl Into<String>,
        mut projections: Vec<Projection<C>>,
        fire_immediately: bool,
        callback: F,
    ) -> WatchHandle<C>
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        let _serial = self.update_gate.lock();
        let snapshot = self.current();

        projections
            .iter_mut()
            .for_each(|p| p.inner.refresh(&snapshot));

        let entry = Arc::new(WatchEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            projections: Mutex::new(projections),
            gate: ReentrantMutex::new(()),
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });
        self.entries.lock().push(Arc::clone(&entry));
        debug!("watch '{}' registered", entry.label);

        if fire_immediately {
            let _gate = entry.gate.lock();
            if entry.active.load(Ordering::Acquire) {
                entry.invoke(&snapshot);
            }
        }

        WatchHandle {
            entry,
            watcher: Arc::downgrade(self),
        }
    }

    /// Replace the snapshot and fire every entry whose projections changed.
    ///
    /// Returns the number of callbacks invoked.
    pub fn update(&self, next: C) -> usize {
        let _serial = self.update_gate.lock();
        let snapshot = Arc::new(next);
        *self.current.write() = Arc::clone(&snapshot);

        let entries: Vec<Arc<WatchEntry<C>>> = self.entries.lock().clone();
        let mut fired = 0;
        for entry in entries {
            // A callback may have pushed a newer snapshot re-entrantly; that
            // update has already evaluated every entry against it.
            if !Arc::ptr_eq(&snapshot, &self.current.read()) {
                break;
            }

            let _gate = entry.gate.lock();
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            let changed = entry.diff_and_refresh(&snapshot);
            if changed.is_empty() {
                continue;
            }
            debug!("watch '{}' fired for {changed:?}", entry.label);
            entry.invoke(&snapshot);
            fired += 1;
        }
        fired
    }
}

impl<C: Clone + Send + Sync + 'static> ConfigWatcher<C> {
    /// Edit a copy of the current snapshot and publish it as one update.
    pub fn modify<F>(&self, edit: F) -> usize
    where
        F: FnOnce(&mut C),
    {
        let _serial = self.update_gate.lock();
        let mut next = C::clone(&self.current());
        edit(&mut next);
        self.update(next)
    }
}

/// Registration token returned by [`ConfigWatcher::watch`].
///
/// Dropping the handle unregisters the entry, so keep it alive for as long
/// as the callback should run.
#[must_use = "dropping a WatchHandle unregisters its callback"]
pub struct WatchHandle<C> {
    entry: Arc<WatchEntry<C>>,
    watcher: Weak<ConfigWatcher<C>>,
}

impl<C> WatchHandle<C> {
    /// Remove the entry. Idempotent.
    ///
    /// Waits for a callback in flight on another thread. After this returns
    /// the callback is never invoked again.
    pub fn unregister(&self) {
        if let Some(watcher) = self.watcher.upgrade() {
            // Released outside the lock: the callback may own other handles.
            let _removed = {
                let mut entries = watcher.entries.lock();
                entries
                    .iter()
                    .position(|e| e.id == self.entry.id)
                    .map(|i| entries.remove(i))
            };
        }
        let _gate = self.entry.gate.lock();
        if self.entry.active.swap(false, Ordering::AcqRel) {
            debug!("watch '{}' unregistered", self.entry.label);
        }
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
    }

    pub fn label(&self) -> &str {
        &self.entry.label
    }
}

impl<C> Drop for WatchHandle<C> {
    fn drop(&mut self) {
        self.unregister();
    }
}
