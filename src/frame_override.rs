//! Frame-local override installation
//!
//! A frame may already carry another tool's local override. Installing
//! ours must not displace it: the existing override is handed to our
//! composition hook and the composed callback is installed instead.

use crate::error::CallbackError;
use crate::runtime::{HostRuntime, TraceCallable};

/// A tool's frame-local override, able to compose with an existing one
pub trait LocalTraceWrapper<C> {
    /// The override itself, as an installable callback
    fn as_callback(&self) -> C;

    /// Compose with a pre-existing frame-local override so both stay reachable
    fn wrap_local_trace(&self, existing: C) -> Result<C, CallbackError>;

    /// Whether `callback` is this override or a composition it produced
    fn owns(&self, callback: &C) -> bool
    where
        C: TraceCallable,
    {
        callback.is_same(&self.as_callback())
    }
}

/// What `install` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No override or no frame given
    Skipped,
    /// The frame already carries this override
    AlreadyInstalled,
    /// The frame had no override; ours was set directly
    Installed,
    /// The existing override was composed with ours
    Composed,
    /// Composition or the attribute write failed; the frame was left as it was
    CompositionFailed,
}

/// Installs frame-local overrides through a host runtime
#[derive(Debug)]
pub struct FrameOverrideInstaller<'r, R: ?Sized> {
    runtime: &'r R,
}

impl<'r, R> FrameOverrideInstaller<'r, R>
where
    R: HostRuntime + ?Sized,
{
    pub fn new(runtime: &'r R) -> Self {
        FrameOverrideInstaller { runtime }
    }

    /// Install `manager` as `frame`'s local override
    ///
    /// Failures are swallowed: whatever diagnostic the composition hook
    /// raised is the only one, and it is logged here.
    pub fn install<M>(&self, manager: Option<&M>, frame: Option<&R::Frame>) -> InstallOutcome
    where
        M: LocalTraceWrapper<R::Callback> + ?Sized,
    {
        let (Some(manager), Some(frame)) = (manager, frame) else {
            return InstallOutcome::Skipped;
        };

        let current = match self.runtime.local_trace(frame) {
            Ok(current) => current,
            Err(err) => {
                tracing::debug!(error = %err, "frame override unreadable; treating as unset");
                None
            }
        };

        let existing = match current {
            Some(existing) if manager.owns(&existing) => return InstallOutcome::AlreadyInstalled,
            Some(existing) if !existing.is_none() => existing,
            _ => {
                return match self
                    .runtime
                    .set_local_trace(frame, Some(manager.as_callback()))
                {
                    Ok(()) => InstallOutcome::Installed,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to install frame override");
                        InstallOutcome::CompositionFailed
                    }
                };
            }
        };

        let composed = match manager.wrap_local_trace(existing) {
            Ok(composed) => composed,
            Err(err) => {
                tracing::warn!(error = %err, "frame override composition raised");
                return InstallOutcome::CompositionFailed;
            }
        };
        match self.runtime.set_local_trace(frame, Some(composed)) {
            Ok(()) => {
                tracing::debug!("composed frame override with existing one");
                InstallOutcome::Composed
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install composed frame override");
                InstallOutcome::CompositionFailed
            }
        }
    }
}
