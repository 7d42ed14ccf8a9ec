//! tracerelay - Safe nested interception of runtime trace callbacks
//!
//! A line profiler installs its own trace callback, but another tool
//! (debugger, coverage tool, other profiler) may already have one in the
//! runtime's single global slot or on individual frames. This library
//! lets the profiler save that callback, relay every event to it, and
//! repair the side effects it may have on the slot and on frame
//! line-event flags, without clobbering anyone's per-frame hooks.
//!
//! The host runtime is abstracted behind [`runtime::HostRuntime`];
//! [`sim_runtime::SimRuntime`] is an in-memory implementation used by
//! the tests and the `tracerelay` scenario CLI.

pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod frame_override;
pub mod invoker;
pub mod relay;
pub mod runtime;
pub mod scenario;
pub mod shared_slot;
pub mod sim_runtime;
pub mod snapshot;

pub use error::{CallbackError, RelayError, Result};
pub use event::TraceEvent;
pub use frame_override::{FrameOverrideInstaller, InstallOutcome, LocalTraceWrapper};
pub use invoker::{LineEventDisabler, RelayOutcome, SafeInvoker};
pub use relay::{RelayCounters, TraceRelay};
pub use runtime::{HostRuntime, TraceCallable};
pub use shared_slot::SharedSlotRuntime;
pub use snapshot::{CallbackHandle, Snapshot, SnapshotStore, StoreConfig};
