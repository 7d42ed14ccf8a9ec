//! In-memory reference host
//!
//! `SimRuntime` implements [`HostRuntime`] with a single-threaded global
//! slot, scripted callbacks and frames whose accessors can be told to
//! fail. It records every callback invocation so tests and the scenario
//! runner can assert exactly who saw which event.

use crate::error::{CallbackError, FrameAttribute, Result};
use crate::frame_override::LocalTraceWrapper;
use crate::runtime::{attribute_error, HostRuntime, TraceCallable};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Event payload in the simulated host
pub type SimArg = String;

/// Something a scripted callback does when invoked, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Noop,
    /// Raise with this message; later behaviours do not run
    Raise(String),
    /// Clear the global trace slot
    UnsetGlobal,
    /// Install the named callback as the global trace callback
    ReplaceGlobal(String),
    /// Switch line events off for the frame being traced
    DisableLineEvents,
    EnableLineEvents,
    /// Install the named callback as the frame's local override
    SetLocal(String),
    /// Make later runtime reads of the frame's attributes fail
    FailFrameReads,
    /// Make later runtime reads of the frame's local override fail
    FailLocalTraceReads,
}

#[derive(Debug, Clone, Default)]
struct IdSource(Rc<Cell<u64>>);

impl IdSource {
    fn next(&self) -> u64 {
        let id = self.0.get() + 1;
        self.0.set(id);
        id
    }
}

enum CallbackKind {
    NoneSentinel,
    Scripted(Vec<Behavior>),
    LineFilter(SimCallback),
    Composed { owner: u64, inner: SimCallback },
}

struct CallbackNode {
    id: u64,
    name: String,
    kind: CallbackKind,
}

/// A callable in the simulated host; clones share identity
#[derive(Clone)]
pub struct SimCallback(Rc<CallbackNode>);

impl SimCallback {
    /// The host's "no callback" value
    pub fn none() -> Self {
        SimCallback(Rc::new(CallbackNode {
            id: 0,
            name: "None".to_string(),
            kind: CallbackKind::NoneSentinel,
        }))
    }

    fn new(id: u64, name: impl Into<String>, kind: CallbackKind) -> Self {
        SimCallback(Rc::new(CallbackNode {
            id,
            name: name.into(),
            kind,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The callback a line filter withholds line events from
    pub fn line_filter_of(&self) -> Option<&SimCallback> {
        match &self.0.kind {
            CallbackKind::LineFilter(inner) => Some(inner),
            _ => None,
        }
    }

    /// The pre-existing override a composition wraps
    pub fn composed_inner(&self) -> Option<&SimCallback> {
        match &self.0.kind {
            CallbackKind::Composed { inner, .. } => Some(inner),
            _ => None,
        }
    }

    /// Human-readable structure, e.g. `composed(profiler, line_filter(A))`
    pub fn describe(&self) -> String {
        match &self.0.kind {
            CallbackKind::NoneSentinel => "None".to_string(),
            CallbackKind::Scripted(_) => self.0.name.clone(),
            CallbackKind::LineFilter(inner) => format!("line_filter({})", inner.describe()),
            CallbackKind::Composed { inner, .. } => {
                format!("composed({}, {})", self.0.name, inner.describe())
            }
        }
    }
}

impl TraceCallable for SimCallback {
    fn is_none(&self) -> bool {
        matches!(self.0.kind, CallbackKind::NoneSentinel)
    }

    fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || (self.is_none() && other.is_none())
    }
}

impl fmt::Debug for SimCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimCallback({}#{})", self.describe(), self.0.id)
    }
}

struct FrameState {
    name: String,
    local: RefCell<Option<SimCallback>>,
    line_events: Cell<bool>,
    fail_reads: Cell<bool>,
    fail_local_reads: Cell<bool>,
    fail_writes: Cell<bool>,
}

/// An activation frame in the simulated host
///
/// The inherent accessors bypass fault injection; only the
/// [`HostRuntime`] accessors honour `fail_reads`/`fail_writes`.
#[derive(Clone)]
pub struct SimFrame(Rc<FrameState>);

impl SimFrame {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn local(&self) -> Option<SimCallback> {
        self.0.local.borrow().clone()
    }

    pub fn set_local(&self, callback: Option<SimCallback>) {
        *self.0.local.borrow_mut() = callback;
    }

    pub fn line_events(&self) -> bool {
        self.0.line_events.get()
    }

    pub fn set_line_events(&self, enabled: bool) {
        self.0.line_events.set(enabled);
    }

    /// Make runtime reads of this frame's attributes fail
    pub fn fail_reads(&self, fail: bool) {
        self.0.fail_reads.set(fail);
    }

    /// Make runtime reads of only the local override fail
    pub fn fail_local_reads(&self, fail: bool) {
        self.0.fail_local_reads.set(fail);
    }

    /// Make runtime writes of this frame's attributes fail
    pub fn fail_writes(&self, fail: bool) {
        self.0.fail_writes.set(fail);
    }

    fn check_read(&self, attribute: FrameAttribute) -> Result<()> {
        let local_blocked =
            attribute == FrameAttribute::LocalTrace && self.0.fail_local_reads.get();
        if self.0.fail_reads.get() || local_blocked {
            return Err(attribute_error(attribute, false, "frame attributes unreadable"));
        }
        Ok(())
    }

    fn check_write(&self, attribute: FrameAttribute) -> Result<()> {
        if self.0.fail_writes.get() {
            return Err(attribute_error(attribute, true, "frame attributes read-only"));
        }
        Ok(())
    }
}

impl fmt::Debug for SimFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimFrame")
            .field("name", &self.0.name)
            .field("local", &self.local())
            .field("line_events", &self.line_events())
            .finish()
    }
}

/// One recorded callback invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub callback: String,
    pub frame: String,
    pub event: String,
    pub arg: Option<SimArg>,
}

/// A profiler-style frame-local override that composes with existing ones
#[derive(Debug)]
pub struct SimManager {
    callback: SimCallback,
    ids: IdSource,
    failure: RefCell<Option<String>>,
}

impl SimManager {
    /// Make every later composition raise `message`
    pub fn fail_composition(&self, message: impl Into<String>) {
        *self.failure.borrow_mut() = Some(message.into());
    }
}

impl LocalTraceWrapper<SimCallback> for SimManager {
    fn as_callback(&self) -> SimCallback {
        self.callback.clone()
    }

    fn wrap_local_trace(
        &self,
        existing: SimCallback,
    ) -> std::result::Result<SimCallback, CallbackError> {
        if let Some(message) = self.failure.borrow().as_ref() {
            return Err(CallbackError::new(message.clone()));
        }
        Ok(SimCallback::new(
            self.ids.next(),
            self.callback.name(),
            CallbackKind::Composed {
                owner: self.callback.id(),
                inner: existing,
            },
        ))
    }

    fn owns(&self, callback: &SimCallback) -> bool {
        match &callback.0.kind {
            CallbackKind::Composed { owner, .. } => *owner == self.callback.id(),
            _ => callback.is_same(&self.callback),
        }
    }
}

/// Single-threaded simulated host runtime
#[derive(Debug)]
pub struct SimRuntime {
    global: RefCell<Option<SimCallback>>,
    registry: RefCell<Vec<SimCallback>>,
    deliveries: RefCell<Vec<Delivery>>,
    ids: IdSource,
    opcode_events: bool,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    pub fn new() -> Self {
        SimRuntime {
            global: RefCell::new(None),
            registry: RefCell::new(Vec::new()),
            deliveries: RefCell::new(Vec::new()),
            ids: IdSource::default(),
            opcode_events: true,
        }
    }

    /// A host predating distinct opcode events
    pub fn without_opcode_events(mut self) -> Self {
        self.opcode_events = false;
        self
    }

    /// A new callback that does nothing but record deliveries
    pub fn callback(&self, name: &str) -> SimCallback {
        self.scripted(name, Vec::new())
    }

    /// A new callback running `behaviors` on each invocation
    pub fn scripted(&self, name: &str, behaviors: Vec<Behavior>) -> SimCallback {
        let callback = SimCallback::new(self.ids.next(), name, CallbackKind::Scripted(behaviors));
        self.registry.borrow_mut().push(callback.clone());
        callback
    }

    /// The most recently created callback called `name`, or a fresh one
    pub fn lookup(&self, name: &str) -> SimCallback {
        let found = self
            .registry
            .borrow()
            .iter()
            .rev()
            .find(|callback| callback.name() == name)
            .cloned();
        found.unwrap_or_else(|| self.callback(name))
    }

    pub fn frame(&self, name: &str) -> SimFrame {
        SimFrame(Rc::new(FrameState {
            name: name.to_string(),
            local: RefCell::new(None),
            line_events: Cell::new(true),
            fail_reads: Cell::new(false),
            fail_local_reads: Cell::new(false),
            fail_writes: Cell::new(false),
        }))
    }

    pub fn manager(&self, name: &str) -> SimManager {
        SimManager {
            callback: self.callback(name),
            ids: self.ids.clone(),
            failure: RefCell::new(None),
        }
    }

    /// A disabler producing line filters around the given callback
    pub fn line_disabler(
        &self,
    ) -> impl Fn(&SimCallback) -> std::result::Result<SimCallback, CallbackError> {
        let ids = self.ids.clone();
        move |callback: &SimCallback| {
            if callback.is_none() {
                return Err(CallbackError::new("cannot disable line events of None"));
            }
            Ok(SimCallback::new(
                ids.next(),
                format!("line_filter({})", callback.name()),
                CallbackKind::LineFilter(callback.clone()),
            ))
        }
    }

    pub fn global(&self) -> Option<SimCallback> {
        self.global.borrow().clone()
    }

    pub fn set_global(&self, callback: Option<SimCallback>) {
        *self.global.borrow_mut() = callback;
    }

    /// Every invocation recorded so far, oldest first
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.borrow().clone()
    }

    pub fn clear_deliveries(&self) {
        self.deliveries.borrow_mut().clear();
    }

    fn run(
        &self,
        callback: &SimCallback,
        frame: &SimFrame,
        event: &str,
        arg: Option<&SimArg>,
    ) -> std::result::Result<(), CallbackError> {
        match &callback.0.kind {
            CallbackKind::NoneSentinel => Err(CallbackError::new("'NoneType' object is not callable")),
            CallbackKind::LineFilter(inner) => {
                if event == "line" {
                    return Ok(());
                }
                self.run(inner, frame, event, arg)
            }
            CallbackKind::Composed { inner, .. } => {
                self.record(callback, frame, event, arg);
                self.run(inner, frame, event, arg)
            }
            CallbackKind::Scripted(behaviors) => {
                self.record(callback, frame, event, arg);
                for behavior in behaviors {
                    self.apply(behavior, frame)?;
                }
                Ok(())
            }
        }
    }

    fn apply(&self, behavior: &Behavior, frame: &SimFrame) -> std::result::Result<(), CallbackError> {
        match behavior {
            Behavior::Noop => {}
            Behavior::Raise(message) => return Err(CallbackError::new(message.clone())),
            Behavior::UnsetGlobal => self.clear_global_trace(),
            Behavior::ReplaceGlobal(name) => {
                let replacement = self.lookup(name);
                self.set_global(Some(replacement));
            }
            Behavior::DisableLineEvents => frame.set_line_events(false),
            Behavior::EnableLineEvents => frame.set_line_events(true),
            Behavior::SetLocal(name) => {
                let local = self.lookup(name);
                frame.set_local(Some(local));
            }
            Behavior::FailFrameReads => frame.fail_reads(true),
            Behavior::FailLocalTraceReads => frame.fail_local_reads(true),
        }
        Ok(())
    }

    fn record(&self, callback: &SimCallback, frame: &SimFrame, event: &str, arg: Option<&SimArg>) {
        self.deliveries.borrow_mut().push(Delivery {
            callback: callback.name().to_string(),
            frame: frame.name().to_string(),
            event: event.to_string(),
            arg: arg.cloned(),
        });
    }
}

impl HostRuntime for SimRuntime {
    type Callback = SimCallback;
    type Frame = SimFrame;
    type Arg = SimArg;

    fn global_trace(&self) -> Option<SimCallback> {
        self.global()
    }

    fn set_global_trace(&self, callback: Option<SimCallback>) {
        self.set_global(callback);
    }

    fn local_trace(&self, frame: &SimFrame) -> Result<Option<SimCallback>> {
        frame.check_read(FrameAttribute::LocalTrace)?;
        Ok(frame.local())
    }

    fn set_local_trace(&self, frame: &SimFrame, callback: Option<SimCallback>) -> Result<()> {
        frame.check_write(FrameAttribute::LocalTrace)?;
        frame.set_local(callback);
        Ok(())
    }

    fn line_events(&self, frame: &SimFrame) -> Result<bool> {
        frame.check_read(FrameAttribute::LineEvents)?;
        Ok(frame.line_events())
    }

    fn set_line_events(&self, frame: &SimFrame, enabled: bool) -> Result<()> {
        frame.check_write(FrameAttribute::LineEvents)?;
        frame.set_line_events(enabled);
        Ok(())
    }

    fn invoke(
        &self,
        callback: &SimCallback,
        frame: &SimFrame,
        event: &str,
        arg: Option<&SimArg>,
    ) -> std::result::Result<(), CallbackError> {
        self.run(callback, frame, event, arg)
    }

    fn distinguishes_opcode(&self) -> bool {
        self.opcode_events
    }
}
