//! Trace event kinds and the string tokens relayed callbacks expect
//!
//! Runtimes add event kinds over time, so unknown kinds are carried
//! through as `Unknown(code)` and relayed as `"call"` instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One kind of trace notification delivered by the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    Call,
    Exception,
    Line,
    Return,
    Opcode,
    CCall,
    CException,
    CReturn,
    /// A kind this crate does not know about, keyed by its raw code
    Unknown(i32),
}

impl TraceEvent {
    /// Every kind with a dedicated token
    pub const KNOWN: [TraceEvent; 8] = [
        TraceEvent::Call,
        TraceEvent::Exception,
        TraceEvent::Line,
        TraceEvent::Return,
        TraceEvent::Opcode,
        TraceEvent::CCall,
        TraceEvent::CException,
        TraceEvent::CReturn,
    ];

    /// Decode the host's numeric event code
    pub fn from_raw(what: i32) -> Self {
        match what {
            0 => TraceEvent::Call,
            1 => TraceEvent::Exception,
            2 => TraceEvent::Line,
            3 => TraceEvent::Return,
            4 => TraceEvent::Opcode,
            5 => TraceEvent::CCall,
            6 => TraceEvent::CException,
            7 => TraceEvent::CReturn,
            other => TraceEvent::Unknown(other),
        }
    }

    /// The host's numeric event code
    pub fn raw(self) -> i32 {
        match self {
            TraceEvent::Call => 0,
            TraceEvent::Exception => 1,
            TraceEvent::Line => 2,
            TraceEvent::Return => 3,
            TraceEvent::Opcode => 4,
            TraceEvent::CCall => 5,
            TraceEvent::CException => 6,
            TraceEvent::CReturn => 7,
            TraceEvent::Unknown(code) => code,
        }
    }

    /// Token handed to a relayed callback
    ///
    /// Unknown kinds fall back to `"call"`.
    pub fn token(self) -> &'static str {
        self.token_for(true)
    }

    /// Token handed to a relayed callback on a host that may not
    /// distinguish opcode events; when it does not, `Opcode` relays as
    /// `"call"` like any other kind the host has no name for.
    pub fn token_for(self, distinguishes_opcode: bool) -> &'static str {
        match self {
            TraceEvent::Call => "call",
            TraceEvent::Exception => "exception",
            TraceEvent::Line => "line",
            TraceEvent::Return => "return",
            TraceEvent::Opcode if distinguishes_opcode => "opcode",
            TraceEvent::CCall => "c_call",
            TraceEvent::CException => "c_exception",
            TraceEvent::CReturn => "c_return",
            TraceEvent::Opcode | TraceEvent::Unknown(_) => "call",
        }
    }

    /// Native-call boundary events
    pub fn is_native(self) -> bool {
        matches!(
            self,
            TraceEvent::CCall | TraceEvent::CException | TraceEvent::CReturn
        )
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Unknown(code) => write!(f, "unknown({code})"),
            known => f.write_str(known.token()),
        }
    }
}

impl FromStr for TraceEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraceEvent::KNOWN
            .into_iter()
            .find(|event| event.token() == s)
            .ok_or_else(|| format!("unknown trace event: {s}"))
    }
}
