//! Hosts whose global trace slot is shared across threads
//!
//! The relay's post-invocation check reads the slot, compares it with
//! the pre-invocation value and conditionally writes it back. On a host
//! with one slot per thread that is race-free. When the slot is shared,
//! wrap the host in [`SharedSlotRuntime`] so the sequence runs under a
//! mutex.

use crate::error::{CallbackError, Result};
use crate::runtime::HostRuntime;
use parking_lot::Mutex;

/// Adds mutual exclusion around global-slot reconciliation
#[derive(Debug, Default)]
pub struct SharedSlotRuntime<R> {
    inner: R,
    slot_lock: Mutex<()>,
}

impl<R> SharedSlotRuntime<R> {
    pub fn new(inner: R) -> Self {
        SharedSlotRuntime {
            inner,
            slot_lock: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Whether a reconciliation currently holds the slot lock
    pub fn is_slot_locked(&self) -> bool {
        self.slot_lock.is_locked()
    }
}

impl<R: HostRuntime> HostRuntime for SharedSlotRuntime<R> {
    type Callback = R::Callback;
    type Frame = R::Frame;
    type Arg = R::Arg;

    fn global_trace(&self) -> Option<Self::Callback> {
        self.inner.global_trace()
    }

    fn set_global_trace(&self, callback: Option<Self::Callback>) {
        self.inner.set_global_trace(callback);
    }

    fn local_trace(&self, frame: &Self::Frame) -> Result<Option<Self::Callback>> {
        self.inner.local_trace(frame)
    }

    fn set_local_trace(&self, frame: &Self::Frame, callback: Option<Self::Callback>) -> Result<()> {
        self.inner.set_local_trace(frame, callback)
    }

    fn line_events(&self, frame: &Self::Frame) -> Result<bool> {
        self.inner.line_events(frame)
    }

    fn set_line_events(&self, frame: &Self::Frame, enabled: bool) -> Result<()> {
        self.inner.set_line_events(frame, enabled)
    }

    fn invoke(
        &self,
        callback: &Self::Callback,
        frame: &Self::Frame,
        event: &str,
        arg: Option<&Self::Arg>,
    ) -> std::result::Result<(), CallbackError> {
        self.inner.invoke(callback, frame, event, arg)
    }

    fn distinguishes_opcode(&self) -> bool {
        self.inner.distinguishes_opcode()
    }

    fn restart_version(&self) -> usize {
        self.inner.restart_version()
    }

    fn with_slot_locked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.slot_lock.lock();
        self.inner.with_slot_locked(f)
    }
}
