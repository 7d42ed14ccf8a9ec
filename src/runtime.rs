//! Host runtime contract
//!
//! The relay never touches runtime internals. It sees the host only
//! through this query/command surface: one global trace-callback slot
//! per thread, and two attributes per frame (the local override and the
//! line-events flag).
//!
//! Default methods are fallbacks built from the required primitives. A
//! host that has a native version of a helper overrides it; one that
//! does not gets identical behaviour for free.

use crate::error::{CallbackError, FrameAttribute, RelayError, Result};
use std::fmt::Debug;

/// A callable the host can install as a trace callback
pub trait TraceCallable: Clone + Debug {
    /// True for the host's explicit "no callback" value (Python's `None`)
    fn is_none(&self) -> bool {
        false
    }

    /// Identity comparison: the same callable object, not merely an equal one
    fn is_same(&self, other: &Self) -> bool;
}

/// Treat both "absent" and the host's "no callback" sentinel as empty
pub fn is_empty_callback<C: TraceCallable>(callback: Option<&C>) -> bool {
    callback.map_or(true, |c| c.is_none())
}

/// The accessor contract a host runtime provides
///
/// All methods take `&self`: frames and the trace slot are mutable host
/// objects reached through shared references, as they are in the
/// runtimes this targets.
pub trait HostRuntime {
    type Callback: TraceCallable;
    type Frame;
    /// Optional event payload (exception info, return value)
    type Arg;

    /// Read the current thread's global trace callback
    fn global_trace(&self) -> Option<Self::Callback>;

    /// Install (or clear, with `None`) the current thread's global trace callback
    fn set_global_trace(&self, callback: Option<Self::Callback>);

    /// Read a frame's local override callback
    fn local_trace(&self, frame: &Self::Frame) -> Result<Option<Self::Callback>>;

    /// Replace a frame's local override callback
    fn set_local_trace(&self, frame: &Self::Frame, callback: Option<Self::Callback>)
        -> Result<()>;

    /// Read a frame's "line events enabled" flag
    fn line_events(&self, frame: &Self::Frame) -> Result<bool>;

    /// Write a frame's "line events enabled" flag
    fn set_line_events(&self, frame: &Self::Frame, enabled: bool) -> Result<()>;

    /// Call `callback(frame, event, arg)`
    fn invoke(
        &self,
        callback: &Self::Callback,
        frame: &Self::Frame,
        event: &str,
        arg: Option<&Self::Arg>,
    ) -> std::result::Result<(), CallbackError>;

    /// Whether the host has a distinct `"opcode"` event
    fn distinguishes_opcode(&self) -> bool {
        true
    }

    /// Monitoring restart counter; `0` means the host does not expose one
    fn restart_version(&self) -> usize {
        0
    }

    /// Run `f` while holding whatever lock guards the global slot
    ///
    /// Thread-affine hosts need none. Hosts sharing one slot across
    /// threads must make the read-compare-restore inside `f` atomic.
    fn with_slot_locked<T>(&self, f: impl FnOnce() -> T) -> T {
        f()
    }

    /// Clear the global trace callback
    fn clear_global_trace(&self) {
        self.set_global_trace(None);
    }

    /// Whether the global slot currently holds no callback
    fn global_trace_is_empty(&self) -> bool {
        is_empty_callback(self.global_trace().as_ref())
    }

    /// Install `callback` as the frame's override, returning the previous one
    fn swap_local_trace(
        &self,
        frame: &Self::Frame,
        callback: Option<Self::Callback>,
    ) -> Result<Option<Self::Callback>> {
        let previous = self.local_trace(frame)?;
        self.set_local_trace(frame, callback)?;
        Ok(previous)
    }
}

/// Helper for host implementations reporting an accessor failure
pub fn attribute_error(attribute: FrameAttribute, write: bool, reason: &str) -> RelayError {
    if write {
        RelayError::write_failed(attribute, reason)
    } else {
        RelayError::read_failed(attribute, reason)
    }
}
