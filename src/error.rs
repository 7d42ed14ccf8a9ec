//! Error taxonomy for trace relaying
//!
//! Every failure here is scoped to a single relayed event or a single
//! handle allocation. None of them should end a tracing session: the
//! caller logs, counts, and keeps tracing.

use std::fmt;
use thiserror::Error;

/// An error raised by host-side code: a relayed trace callback, a
/// line-event disabler, or a composition hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    pub message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Frame attributes this crate reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameAttribute {
    /// The frame-local override callback (`f_trace` in CPython terms)
    LocalTrace,
    /// The per-frame "line events enabled" flag (`f_trace_lines`)
    LineEvents,
}

impl FrameAttribute {
    pub fn name(self) -> &'static str {
        match self {
            FrameAttribute::LocalTrace => "local_override_callback",
            FrameAttribute::LineEvents => "line_events_enabled",
        }
    }
}

impl fmt::Display for FrameAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an attribute access was a read or a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => f.write_str("read"),
            AccessKind::Write => f.write_str("write"),
        }
    }
}

/// Which part of a relay raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    /// The previously-installed callback itself
    Invoke,
    /// The caller-supplied disabler used to repair line events
    DisableLineEvents,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStage::Invoke => f.write_str("relayed callback"),
            RelayStage::DisableLineEvents => f.write_str("line-event disabler"),
        }
    }
}

/// Errors returned by handle allocation and event relaying
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error(
        "failed to allocate storage for the existing trace callback \
         ({live} handles live, limit {limit})"
    )]
    OutOfMemory { live: usize, limit: usize },

    #[error("{stage} raised on `{event}` event: {source}")]
    RelayFailure {
        stage: RelayStage,
        event: &'static str,
        #[source]
        source: CallbackError,
    },

    #[error("failed to {access} frame attribute `{attribute}`: {reason}")]
    AttributeAccess {
        attribute: FrameAttribute,
        access: AccessKind,
        reason: String,
    },
}

impl RelayError {
    pub fn read_failed(attribute: FrameAttribute, reason: impl Into<String>) -> Self {
        RelayError::AttributeAccess {
            attribute,
            access: AccessKind::Read,
            reason: reason.into(),
        }
    }

    pub fn write_failed(attribute: FrameAttribute, reason: impl Into<String>) -> Self {
        RelayError::AttributeAccess {
            attribute,
            access: AccessKind::Write,
            reason: reason.into(),
        }
    }

    /// True for errors raised by host callables rather than by the
    /// frame accessors or the handle store
    pub fn is_relay_failure(&self) -> bool {
        matches!(self, RelayError::RelayFailure { .. })
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
