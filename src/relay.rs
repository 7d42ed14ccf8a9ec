//! Relay facade for a profiler's own trace callback
//!
//! `TraceRelay` bundles a host runtime, the handle store and the two
//! hot-path operations, and keeps per-thread counters. It is what a
//! profiler's global callback talks to: allocate and populate a handle
//! when taking over the slot, `relay` each event onward, `install` on
//! frames entered, `restore` and `free` when giving the slot back.

use crate::config::{FailurePolicy, RelayConfig};
use crate::error::Result;
use crate::event::TraceEvent;
use crate::frame_override::{FrameOverrideInstaller, InstallOutcome, LocalTraceWrapper};
use crate::invoker::{LineEventDisabler, RelayOutcome, SafeInvoker};
use crate::runtime::HostRuntime;
use crate::snapshot::{CallbackHandle, SnapshotStore, StoreStats};
use serde::Serialize;

/// Counters for one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    /// Events delivered to a previously-installed callback
    pub delivered: u64,
    /// Events with nothing to relay to, or relaying disabled
    pub skipped: u64,
    pub failures: u64,
    pub self_unsets: u64,
    pub line_repairs: u64,
    /// Overrides set directly on a frame
    pub installs: u64,
    /// Overrides composed with an existing one
    pub compositions: u64,
    pub install_failures: u64,
}

/// A runtime plus everything needed to relay events through it safely
#[derive(Debug)]
pub struct TraceRelay<R: HostRuntime> {
    runtime: R,
    store: SnapshotStore<R::Callback>,
    policy: FailurePolicy,
    counters: RelayCounters,
    disabled: bool,
}

impl<R: HostRuntime> TraceRelay<R> {
    pub fn new(runtime: R) -> Self {
        Self::with_config(runtime, &RelayConfig::default())
    }

    pub fn with_config(runtime: R, config: &RelayConfig) -> Self {
        TraceRelay {
            runtime,
            store: SnapshotStore::new(config.store.clone()),
            policy: config.failure_policy,
            counters: RelayCounters::default(),
            disabled: false,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn store(&self) -> &SnapshotStore<R::Callback> {
        &self.store
    }

    pub fn allocate(&mut self) -> Result<CallbackHandle> {
        self.store.allocate().map_err(|err| {
            tracing::warn!(error = %err, "cannot save the existing trace callback");
            err
        })
    }

    pub fn free(&mut self, handle: CallbackHandle) {
        self.store.free(handle);
    }

    /// Save the runtime's current global callback in `handle`
    pub fn populate(&mut self, handle: &CallbackHandle) {
        self.store.populate(handle, &self.runtime);
    }

    pub fn nullify(&mut self, handle: &CallbackHandle) {
        self.store.nullify(handle);
    }

    /// Put the saved callback back in the runtime's global slot
    pub fn restore(&mut self, handle: &CallbackHandle) {
        self.store.restore(handle, &self.runtime);
    }

    pub fn is_empty(&self, handle: &CallbackHandle) -> bool {
        self.store.is_empty(handle)
    }

    /// Relay one event to the callback saved in `handle`
    ///
    /// Failures are logged and counted before being returned; under
    /// [`FailurePolicy::DisableThread`] later relays are skipped until
    /// [`reset_failures`](Self::reset_failures).
    pub fn relay<D>(
        &mut self,
        disabler: &D,
        handle: &CallbackHandle,
        frame: &R::Frame,
        event: TraceEvent,
        arg: Option<&R::Arg>,
    ) -> Result<RelayOutcome>
    where
        D: LineEventDisabler<R::Callback> + ?Sized,
    {
        if self.disabled {
            self.counters.skipped += 1;
            return Ok(RelayOutcome::Skipped);
        }

        let result = SafeInvoker::new(&self.runtime).relay(
            disabler,
            &mut self.store,
            handle,
            frame,
            event,
            arg,
        );

        match &result {
            Ok(RelayOutcome::Skipped) => self.counters.skipped += 1,
            Ok(RelayOutcome::Delivered {
                self_unset,
                line_events_repaired,
            }) => {
                self.counters.delivered += 1;
                self.counters.self_unsets += u64::from(*self_unset);
                self.counters.line_repairs += u64::from(*line_events_repaired);
            }
            Err(err) => {
                self.counters.failures += 1;
                tracing::warn!(error = %err, event = %event, "trace relay failed");
                if self.policy == FailurePolicy::DisableThread {
                    tracing::warn!("disabling trace relay for this thread");
                    self.disabled = true;
                }
            }
        }
        result
    }

    /// Install `manager` as `frame`'s local override
    pub fn install<M>(&mut self, manager: Option<&M>, frame: Option<&R::Frame>) -> InstallOutcome
    where
        M: LocalTraceWrapper<R::Callback> + ?Sized,
    {
        let outcome = FrameOverrideInstaller::new(&self.runtime).install(manager, frame);
        match outcome {
            InstallOutcome::Installed => self.counters.installs += 1,
            InstallOutcome::Composed => self.counters.compositions += 1,
            InstallOutcome::CompositionFailed => self.counters.install_failures += 1,
            InstallOutcome::Skipped | InstallOutcome::AlreadyInstalled => {}
        }
        outcome
    }

    /// Whether relaying was switched off by the failure policy
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Re-enable relaying after a `DisableThread` shutdown
    pub fn reset_failures(&mut self) {
        self.disabled = false;
    }

    pub fn counters(&self) -> RelayCounters {
        self.counters
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }
}
