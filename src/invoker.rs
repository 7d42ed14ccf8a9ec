//! Safe relaying of one event to a previously-installed trace callback
//!
//! The relayed callback runs inside our own trace callback, so it can
//! disturb two things the profiler depends on:
//!
//! - the global trace slot (it may unset or replace it), and
//! - the frame's line-events flag (it may switch line events off, which
//!   would also blind the profiler's own frame-local override).
//!
//! After every invocation both are reconciled, independently and in that
//! order. An unset slot is mirrored (the saved callback is dropped, the
//! slot stays empty), anything else is re-asserted to the pre-invocation
//! callback. A disabled line flag is switched back on, and the frame's
//! override is wrapped by the caller's disabler so only that callback
//! stops seeing line events.

use crate::error::{CallbackError, RelayError, RelayStage, Result};
use crate::event::TraceEvent;
use crate::runtime::{is_empty_callback, HostRuntime, TraceCallable};
use crate::snapshot::{CallbackHandle, Snapshot, SnapshotStore};

/// Produces a frame-local callback that swallows line events for the
/// wrapped callback and passes every other kind through
pub trait LineEventDisabler<C> {
    fn disable_line_events(&self, callback: &C) -> std::result::Result<C, CallbackError>;
}

impl<C, F> LineEventDisabler<C> for F
where
    F: Fn(&C) -> std::result::Result<C, CallbackError>,
{
    fn disable_line_events(&self, callback: &C) -> std::result::Result<C, CallbackError> {
        self(callback)
    }
}

/// What a successful relay did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Nothing to relay to
    Skipped,
    Delivered {
        /// The callback cleared the global slot; the handle was nullified
        self_unset: bool,
        /// The callback disabled line events; the flag was reverted and
        /// the frame override wrapped
        line_events_repaired: bool,
    },
}

impl RelayOutcome {
    pub fn was_delivered(self) -> bool {
        matches!(self, RelayOutcome::Delivered { .. })
    }
}

/// Relays events through a host runtime
#[derive(Debug)]
pub struct SafeInvoker<'r, R: ?Sized> {
    runtime: &'r R,
}

impl<'r, R> SafeInvoker<'r, R>
where
    R: HostRuntime + ?Sized,
{
    pub fn new(runtime: &'r R) -> Self {
        SafeInvoker { runtime }
    }

    /// Forward `event` to the callback saved in `handle`
    ///
    /// Both reconciliation steps run even when the callback raised: an
    /// erroring callback is expected to have unset itself, and that
    /// must be mirrored rather than left stale. When several steps fail,
    /// the first failure is returned.
    pub fn relay<D>(
        &self,
        disabler: &D,
        store: &mut SnapshotStore<R::Callback>,
        handle: &CallbackHandle,
        frame: &R::Frame,
        event: TraceEvent,
        arg: Option<&R::Arg>,
    ) -> Result<RelayOutcome>
    where
        D: LineEventDisabler<R::Callback> + ?Sized,
    {
        if store.is_empty(handle) {
            return Ok(RelayOutcome::Skipped);
        }
        let Some(target) = store.callback(handle).cloned() else {
            return Ok(RelayOutcome::Skipped);
        };

        let line_events_before = match self.runtime.line_events(frame) {
            Ok(enabled) => enabled,
            Err(err) => {
                tracing::debug!(error = %err, "line-events flag unreadable before relay");
                false
            }
        };
        let mut before = Snapshot::capture(self.runtime);

        let token = event.token_for(self.runtime.distinguishes_opcode());
        tracing::trace!(
            event = token,
            restart_version = self.runtime.restart_version(),
            "relaying trace event"
        );
        let invoked = self
            .runtime
            .invoke(&target, frame, token, arg)
            .map_err(|source| RelayError::RelayFailure {
                stage: RelayStage::Invoke,
                event: token,
                source,
            });

        let self_unset = self.reconcile_global_slot(store, handle, &mut before);

        let repaired = if line_events_before {
            self.repair_line_events(disabler, frame, &target, token)
        } else {
            Ok(false)
        };

        match (invoked, repaired) {
            (Err(err), Err(repair_err)) => {
                tracing::warn!(error = %repair_err, "line-event repair also failed");
                Err(err)
            }
            (Err(err), Ok(_)) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(line_events_repaired)) => Ok(RelayOutcome::Delivered {
                self_unset,
                line_events_repaired,
            }),
        }
    }

    /// Mirror a self-unset, otherwise put the pre-invocation callback back
    fn reconcile_global_slot(
        &self,
        store: &mut SnapshotStore<R::Callback>,
        handle: &CallbackHandle,
        before: &mut Snapshot<R::Callback>,
    ) -> bool {
        self.runtime.with_slot_locked(|| {
            let after = self.runtime.global_trace();
            if is_empty_callback(after.as_ref()) {
                tracing::debug!("relayed callback unset the global trace slot");
                store.nullify(handle);
                before.clear();
                return true;
            }

            let unchanged = match (before.callback(), after.as_ref()) {
                (Some(saved), Some(current)) => saved.is_same(current),
                _ => false,
            };
            if unchanged {
                before.clear();
            } else {
                tracing::debug!("relayed callback replaced the global trace slot; re-asserting");
                before.restore(self.runtime);
            }
            false
        })
    }

    /// Undo a disabled line-events flag, withholding future line events
    /// from the frame's override instead
    fn repair_line_events<D>(
        &self,
        disabler: &D,
        frame: &R::Frame,
        relayed: &R::Callback,
        token: &'static str,
    ) -> Result<bool>
    where
        D: LineEventDisabler<R::Callback> + ?Sized,
    {
        if self.runtime.line_events(frame)? {
            return Ok(false);
        }

        tracing::debug!("relayed callback disabled line events; reverting");
        self.runtime.set_line_events(frame, true)?;

        let current = self.runtime.local_trace(frame)?;
        let target = match current {
            Some(local) if !local.is_none() => local,
            _ => relayed.clone(),
        };
        let wrapped =
            disabler
                .disable_line_events(&target)
                .map_err(|source| RelayError::RelayFailure {
                    stage: RelayStage::DisableLineEvents,
                    event: token,
                    source,
                })?;
        self.runtime.set_local_trace(frame, Some(wrapped))?;
        Ok(true)
    }
}
