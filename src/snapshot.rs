//! Saved trace callbacks
//!
//! A [`Snapshot`] is a copy of the host's global trace slot taken at one
//! instant. [`SnapshotStore`] owns a pool of snapshot slots addressed by
//! move-only [`CallbackHandle`]s: one handle per "callback that was
//! active before we installed ours".
//!
//! Restoring an empty snapshot never clears the host slot. Absence of a
//! saved value is not the same thing as "no callback wanted".

use crate::error::{RelayError, Result};
use crate::runtime::{is_empty_callback, HostRuntime, TraceCallable};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A copy of the global trace slot, or nothing
#[derive(Debug, Clone)]
pub struct Snapshot<C> {
    callback: Option<C>,
}

impl<C> Default for Snapshot<C> {
    fn default() -> Self {
        Snapshot { callback: None }
    }
}

impl<C: TraceCallable> Snapshot<C> {
    /// An empty snapshot
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read the host's current global callback
    pub fn capture<R>(runtime: &R) -> Self
    where
        R: HostRuntime<Callback = C> + ?Sized,
    {
        Snapshot {
            callback: runtime.global_trace(),
        }
    }

    /// True when nothing is held or the held value is the "no callback" sentinel
    pub fn is_empty(&self) -> bool {
        is_empty_callback(self.callback.as_ref())
    }

    pub fn callback(&self) -> Option<&C> {
        self.callback.as_ref()
    }

    /// Release the held callback
    pub fn clear(&mut self) {
        self.callback = None;
    }

    /// Reinstall the held callback as the host's global callback, then clear
    ///
    /// Returns whether anything was installed.
    pub fn restore<R>(&mut self, runtime: &R) -> bool
    where
        R: HostRuntime<Callback = C> + ?Sized,
    {
        let installed = match self.callback.take() {
            Some(callback) if !callback.is_none() => {
                runtime.set_global_trace(Some(callback));
                true
            }
            _ => false,
        };
        self.clear();
        installed
    }
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Move-only key for one slot in a [`SnapshotStore`]
///
/// Not `Clone`: two handles never alias the same saved callback. A
/// handle names its store and the slot's generation, so a handle from
/// another store, or one whose slot was freed and reused, matches
/// nothing.
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackHandle {
    store: u64,
    slot: usize,
    generation: u32,
}

impl CallbackHandle {
    pub fn index(&self) -> usize {
        self.slot
    }
}

/// Configuration for the handle store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Slots reserved up front
    pub initial_capacity: usize,
    /// Hard limit on live handles (`None` = limited only by memory)
    pub max_handles: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            initial_capacity: 16,
            max_handles: None,
        }
    }
}

impl StoreConfig {
    pub fn new(initial_capacity: usize) -> Self {
        StoreConfig {
            initial_capacity,
            max_handles: None,
        }
    }

    /// Cap the number of live handles
    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = Some(max_handles);
        self
    }
}

#[derive(Debug)]
struct Slot<C> {
    generation: u32,
    /// `None` while the slot is vacant
    snapshot: Option<Snapshot<C>>,
}

/// Pool of saved callbacks
#[derive(Debug)]
pub struct SnapshotStore<C> {
    id: u64,
    slots: Vec<Slot<C>>,
    vacant: Vec<usize>,
    config: StoreConfig,
    live: usize,
    allocated: u64,
    restored: u64,
    nullified: u64,
}

impl<C: TraceCallable> Default for SnapshotStore<C> {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl<C: TraceCallable> SnapshotStore<C> {
    pub fn new(config: StoreConfig) -> Self {
        SnapshotStore {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::with_capacity(config.initial_capacity),
            vacant: Vec::new(),
            config,
            live: 0,
            allocated: 0,
            restored: 0,
            nullified: 0,
        }
    }

    /// Hand out an empty handle
    ///
    /// Fails with `OutOfMemory` when the configured limit is reached or
    /// the backing storage cannot grow.
    pub fn allocate(&mut self) -> Result<CallbackHandle> {
        let limit = self.config.max_handles.unwrap_or(usize::MAX);
        if self.live >= limit {
            return Err(RelayError::OutOfMemory {
                live: self.live,
                limit,
            });
        }

        let recycled = self.vacant.pop().and_then(|index| {
            let entry = self.slots.get_mut(index)?;
            entry.generation = entry.generation.wrapping_add(1);
            entry.snapshot = Some(Snapshot::empty());
            Some((index, entry.generation))
        });
        let (slot, generation) = match recycled {
            Some(found) => found,
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| RelayError::OutOfMemory {
                        live: self.live,
                        limit,
                    })?;
                self.slots.push(Slot {
                    generation: 0,
                    snapshot: Some(Snapshot::empty()),
                });
                (self.slots.len() - 1, 0)
            }
        };

        self.live += 1;
        self.allocated += 1;
        Ok(CallbackHandle {
            store: self.id,
            slot,
            generation,
        })
    }

    /// Return a handle's slot to the pool, releasing any held callback
    ///
    /// A handle this store did not issue is dropped without effect.
    pub fn free(&mut self, handle: CallbackHandle) {
        if self.snapshot_mut(&handle).is_none() {
            return;
        }
        if let Some(entry) = self.slots.get_mut(handle.slot) {
            entry.snapshot = None;
            self.vacant.push(handle.slot);
            self.live -= 1;
        }
    }

    /// Whether `handle` was issued by this store and its slot is still live
    pub fn owns(&self, handle: &CallbackHandle) -> bool {
        self.snapshot(handle).is_some()
    }

    /// Copy the host's current global callback into `handle`
    ///
    /// Any previous content is released first.
    pub fn populate<R>(&mut self, handle: &CallbackHandle, runtime: &R)
    where
        R: HostRuntime<Callback = C> + ?Sized,
    {
        if let Some(snapshot) = self.snapshot_mut(handle) {
            *snapshot = Snapshot::capture(runtime);
        }
    }

    /// Release the held callback, if any. Idempotent.
    pub fn nullify(&mut self, handle: &CallbackHandle) {
        if let Some(snapshot) = self.snapshot_mut(handle) {
            if snapshot.callback().is_some() {
                snapshot.clear();
                self.nullified += 1;
            }
        }
    }

    /// Reinstall the held callback as the host's global callback and
    /// empty the handle
    ///
    /// An empty handle leaves the host slot alone.
    pub fn restore<R>(&mut self, handle: &CallbackHandle, runtime: &R)
    where
        R: HostRuntime<Callback = C> + ?Sized,
    {
        if let Some(snapshot) = self.snapshot_mut(handle) {
            if snapshot.restore(runtime) {
                self.restored += 1;
            }
        }
    }

    /// True if `handle` holds no callback or the "no callback" sentinel
    pub fn is_empty(&self, handle: &CallbackHandle) -> bool {
        self.snapshot(handle).map_or(true, Snapshot::is_empty)
    }

    /// The callback held by `handle`
    pub fn callback(&self, handle: &CallbackHandle) -> Option<&C> {
        self.snapshot(handle).and_then(Snapshot::callback)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live: self.live,
            slots: self.slots.len(),
            allocated: self.allocated,
            restored: self.restored,
            nullified: self.nullified,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn snapshot(&self, handle: &CallbackHandle) -> Option<&Snapshot<C>> {
        if handle.store != self.id {
            return None;
        }
        self.slots
            .get(handle.slot)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.snapshot.as_ref())
    }

    fn snapshot_mut(&mut self, handle: &CallbackHandle) -> Option<&mut Snapshot<C>> {
        if handle.store != self.id {
            return None;
        }
        self.slots
            .get_mut(handle.slot)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.snapshot.as_mut())
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Handles currently allocated
    pub live: usize,
    /// Slots ever created (live + vacant)
    pub slots: usize,
    /// Total allocate operations that succeeded
    pub allocated: u64,
    /// Restores that installed a callback
    pub restored: u64,
    /// Nullifications that released a callback
    pub nullified: u64,
}

impl StoreStats {
    /// Percentage of allocations served from recycled slots
    pub fn reuse_rate(&self) -> f64 {
        if self.allocated == 0 {
            return 0.0;
        }
        let reused = self.allocated.saturating_sub(self.slots as u64);
        (reused as f64 / self.allocated as f64) * 100.0
    }
}
