//! Scripted relay scenarios
//!
//! A scenario declares callbacks (with scripted behaviours), frames and
//! the initial global callback, then a list of steps run in order
//! through a [`TraceRelay`] over [`SimRuntime`]. The report shows what
//! each step did and the final state of the slot, frames and deliveries.
//!
//! ```json
//! {
//!   "callbacks": [{ "name": "A", "behaviors": ["disable_line_events"] }],
//!   "frames": [{ "name": "F" }],
//!   "global": "A",
//!   "steps": [
//!     { "op": "allocate", "handle": "h" },
//!     { "op": "populate", "handle": "h" },
//!     { "op": "relay", "handle": "h", "frame": "F", "event": "line" }
//!   ]
//! }
//! ```

use crate::config::RelayConfig;
use crate::event::TraceEvent;
use crate::invoker::RelayOutcome;
use crate::frame_override::InstallOutcome;
use crate::relay::{RelayCounters, TraceRelay};
use crate::sim_runtime::{Behavior, Delivery, SimCallback, SimFrame, SimManager, SimRuntime};
use crate::snapshot::{CallbackHandle, StoreStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Name that refers to the host's "no callback" value
pub const NONE_NAME: &str = "None";

/// Errors in a scenario's structure; relay failures are reported per step instead
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("Step {step}: unknown {kind} `{name}`")]
    Unknown {
        step: usize,
        kind: &'static str,
        name: String,
    },

    #[error("Step {step}: handle `{name}` is already allocated")]
    HandleInUse { step: usize, name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackSpec {
    pub name: String,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub line_events: bool,
    /// Initial local override, by callback name
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub fail_reads: bool,
    #[serde(default)]
    pub fail_writes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerSpec {
    pub name: String,
    /// Make every composition by this manager raise this message
    #[serde(default)]
    pub fail_composition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Allocate {
        handle: String,
    },
    Populate {
        handle: String,
    },
    Relay {
        handle: String,
        frame: String,
        event: TraceEvent,
        #[serde(default)]
        arg: Option<String>,
    },
    Restore {
        handle: String,
    },
    Nullify {
        handle: String,
    },
    Free {
        handle: String,
    },
    Install {
        manager: String,
        frame: String,
    },
    SetGlobal {
        callback: Option<String>,
    },
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Step::Allocate { .. } => "allocate",
            Step::Populate { .. } => "populate",
            Step::Relay { .. } => "relay",
            Step::Restore { .. } => "restore",
            Step::Nullify { .. } => "nullify",
            Step::Free { .. } => "free",
            Step::Install { .. } => "install",
            Step::SetGlobal { .. } => "set_global",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub callbacks: Vec<CallbackSpec>,
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
    #[serde(default)]
    pub managers: Vec<ManagerSpec>,
    #[serde(default)]
    pub global: Option<String>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub ok: bool,
    pub result: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub name: String,
    pub local: Option<String>,
    pub line_events: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub global: Option<String>,
    pub frames: Vec<FrameReport>,
    pub deliveries: Vec<Delivery>,
    pub counters: RelayCounters,
    pub store: StoreStats,
}

impl ScenarioReport {
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Steps:")?;
        for step in &self.steps {
            let mark = if step.ok { "ok " } else { "ERR" };
            writeln!(
                f,
                "  [{mark}] {:>3} {:<10} {}",
                step.index, step.op, step.result
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Global trace callback: {}",
            self.global.as_deref().unwrap_or("<unset>")
        )?;
        writeln!(f, "Frames:")?;
        for frame in &self.frames {
            writeln!(
                f,
                "  {:<12} local={:<32} line_events={}",
                frame.name,
                frame.local.as_deref().unwrap_or("<unset>"),
                frame.line_events
            )?;
        }
        writeln!(f, "Deliveries:")?;
        if self.deliveries.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for delivery in &self.deliveries {
            writeln!(
                f,
                "  {:<12} {:<12} {:<12} {}",
                delivery.callback,
                delivery.frame,
                delivery.event,
                delivery.arg.as_deref().unwrap_or("")
            )?;
        }
        let c = &self.counters;
        writeln!(
            f,
            "Relays: {} delivered, {} skipped, {} failed ({} self-unsets, {} line repairs)",
            c.delivered, c.skipped, c.failures, c.self_unsets, c.line_repairs
        )?;
        writeln!(
            f,
            "Overrides: {} installed, {} composed, {} failed",
            c.installs, c.compositions, c.install_failures
        )
    }
}

fn lookup_handle<'a>(
    handles: &'a HashMap<String, CallbackHandle>,
    step: usize,
    name: &str,
) -> Result<&'a CallbackHandle, ScenarioError> {
    handles.get(name).ok_or_else(|| ScenarioError::Unknown {
        step,
        kind: "handle",
        name: name.to_string(),
    })
}

struct World {
    relay: TraceRelay<SimRuntime>,
    callbacks: HashMap<String, SimCallback>,
    frames: Vec<SimFrame>,
    managers: HashMap<String, SimManager>,
    handles: HashMap<String, CallbackHandle>,
}

impl World {
    fn build(scenario: &Scenario, config: &RelayConfig) -> Result<Self, ScenarioError> {
        let runtime = SimRuntime::new();

        let mut callbacks = HashMap::new();
        for spec in &scenario.callbacks {
            if spec.name == NONE_NAME || callbacks.contains_key(&spec.name) {
                return Err(ScenarioError::Duplicate {
                    kind: "callback",
                    name: spec.name.clone(),
                });
            }
            let callback = runtime.scripted(&spec.name, spec.behaviors.clone());
            callbacks.insert(spec.name.clone(), callback);
        }

        let mut managers = HashMap::new();
        for spec in &scenario.managers {
            if managers.contains_key(&spec.name) || callbacks.contains_key(&spec.name) {
                return Err(ScenarioError::Duplicate {
                    kind: "manager",
                    name: spec.name.clone(),
                });
            }
            let manager = runtime.manager(&spec.name);
            if let Some(message) = &spec.fail_composition {
                manager.fail_composition(message.clone());
            }
            managers.insert(spec.name.clone(), manager);
        }

        let mut world = World {
            relay: TraceRelay::with_config(runtime, config),
            callbacks,
            frames: Vec::new(),
            managers,
            handles: HashMap::new(),
        };

        for spec in &scenario.frames {
            if world.frames.iter().any(|f| f.name() == spec.name) {
                return Err(ScenarioError::Duplicate {
                    kind: "frame",
                    name: spec.name.clone(),
                });
            }
            let frame = world.relay.runtime().frame(&spec.name);
            frame.set_line_events(spec.line_events);
            if let Some(local) = &spec.local {
                frame.set_local(Some(world.callback(0, local)?));
            }
            frame.fail_reads(spec.fail_reads);
            frame.fail_writes(spec.fail_writes);
            world.frames.push(frame);
        }

        if let Some(global) = &scenario.global {
            let callback = world.callback(0, global)?;
            world.relay.runtime().set_global(Some(callback));
        }
        Ok(world)
    }

    fn callback(&self, step: usize, name: &str) -> Result<SimCallback, ScenarioError> {
        if name == NONE_NAME {
            return Ok(SimCallback::none());
        }
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::Unknown {
                step,
                kind: "callback",
                name: name.to_string(),
            })
    }

    fn frame(&self, step: usize, name: &str) -> Result<SimFrame, ScenarioError> {
        self.frames
            .iter()
            .find(|frame| frame.name() == name)
            .cloned()
            .ok_or_else(|| ScenarioError::Unknown {
                step,
                kind: "frame",
                name: name.to_string(),
            })
    }

    fn run_step(&mut self, index: usize, step: &Step) -> Result<StepReport, ScenarioError> {
        let (ok, result) = match step {
            Step::Allocate { handle } => {
                if self.handles.contains_key(handle) {
                    return Err(ScenarioError::HandleInUse {
                        step: index,
                        name: handle.clone(),
                    });
                }
                match self.relay.allocate() {
                    Ok(allocated) => {
                        self.handles.insert(handle.clone(), allocated);
                        (true, "allocated".to_string())
                    }
                    Err(err) => (false, err.to_string()),
                }
            }
            Step::Populate { handle } => {
                let handle = lookup_handle(&self.handles, index, handle)?;
                self.relay.populate(handle);
                (true, self.describe_handle(handle))
            }
            Step::Relay {
                handle,
                frame,
                event,
                arg,
            } => {
                let frame = self.frame(index, frame)?;
                let handle = lookup_handle(&self.handles, index, handle)?;
                let disabler = self.relay.runtime().line_disabler();
                match self
                    .relay
                    .relay(&disabler, handle, &frame, *event, arg.as_ref())
                {
                    Ok(RelayOutcome::Skipped) => (true, "skipped".to_string()),
                    Ok(RelayOutcome::Delivered {
                        self_unset,
                        line_events_repaired,
                    }) => {
                        let mut result = "delivered".to_string();
                        if self_unset {
                            result.push_str(", self-unset");
                        }
                        if line_events_repaired {
                            result.push_str(", line events repaired");
                        }
                        (true, result)
                    }
                    Err(err) => (false, err.to_string()),
                }
            }
            Step::Restore { handle } => {
                let handle = lookup_handle(&self.handles, index, handle)?;
                self.relay.restore(handle);
                (true, "restored".to_string())
            }
            Step::Nullify { handle } => {
                let handle = lookup_handle(&self.handles, index, handle)?;
                self.relay.nullify(handle);
                (true, "nullified".to_string())
            }
            Step::Free { handle } => {
                let name = handle;
                let handle = self
                    .handles
                    .remove(name)
                    .ok_or_else(|| ScenarioError::Unknown {
                        step: index,
                        kind: "handle",
                        name: name.clone(),
                    })?;
                self.relay.free(handle);
                (true, "freed".to_string())
            }
            Step::Install { manager, frame } => {
                let frame = self.frame(index, frame)?;
                let manager = self
                    .managers
                    .get(manager)
                    .ok_or_else(|| ScenarioError::Unknown {
                        step: index,
                        kind: "manager",
                        name: manager.clone(),
                    })?;
                let outcome = self.relay.install(Some(manager), Some(&frame));
                let result = match outcome {
                    InstallOutcome::Skipped => "skipped",
                    InstallOutcome::AlreadyInstalled => "already installed",
                    InstallOutcome::Installed => "installed",
                    InstallOutcome::Composed => "composed",
                    InstallOutcome::CompositionFailed => "composition failed",
                };
                (outcome != InstallOutcome::CompositionFailed, result.to_string())
            }
            Step::SetGlobal { callback } => {
                let callback = match callback {
                    Some(name) => Some(self.callback(index, name)?),
                    None => None,
                };
                self.relay.runtime().set_global(callback);
                (true, "set".to_string())
            }
        };
        Ok(StepReport {
            index,
            op: step.op(),
            ok,
            result,
        })
    }

    fn describe_handle(&self, handle: &CallbackHandle) -> String {
        match self.relay.store().callback(handle) {
            Some(callback) => format!("holds {}", callback.describe()),
            None => "holds nothing".to_string(),
        }
    }

    fn report(&self, steps: Vec<StepReport>) -> ScenarioReport {
        let runtime = self.relay.runtime();
        ScenarioReport {
            steps,
            global: runtime.global().map(|callback| callback.describe()),
            frames: self
                .frames
                .iter()
                .map(|frame| FrameReport {
                    name: frame.name().to_string(),
                    local: frame.local().map(|callback| callback.describe()),
                    line_events: frame.line_events(),
                })
                .collect(),
            deliveries: runtime.deliveries(),
            counters: self.relay.counters(),
            store: self.relay.store_stats(),
        }
    }
}

/// Replay `scenario` and report the outcome
pub fn run_scenario(
    scenario: &Scenario,
    config: &RelayConfig,
) -> Result<ScenarioReport, ScenarioError> {
    let mut world = World::build(scenario, config)?;
    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        steps.push(world.run_step(index, step)?);
    }
    Ok(world.report(steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_REPAIR: &str = r#"{
        "callbacks": [{ "name": "A", "behaviors": ["disable_line_events"] }],
        "frames": [{ "name": "F" }],
        "global": "A",
        "steps": [
            { "op": "allocate", "handle": "h" },
            { "op": "populate", "handle": "h" },
            { "op": "relay", "handle": "h", "frame": "F", "event": "line" }
        ]
    }"#;

    #[test]
    fn test_line_repair_scenario() {
        let scenario = Scenario::from_json(LINE_REPAIR).unwrap();
        let report = run_scenario(&scenario, &RelayConfig::default()).unwrap();

        assert!(report.steps.iter().all(|step| step.ok));
        assert_eq!(report.steps[1].result, "holds A");
        assert_eq!(report.steps[2].result, "delivered, line events repaired");
        assert_eq!(report.frames[0].local.as_deref(), Some("line_filter(A)"));
        assert!(report.frames[0].line_events);
        assert_eq!(report.global.as_deref(), Some("A"));
    }

    #[test]
    fn test_relay_failure_is_a_step_result() {
        let scenario = Scenario::from_json(
            r#"{
                "callbacks": [{ "name": "A", "behaviors": [{ "raise": "boom" }] }],
                "frames": [{ "name": "F" }],
                "global": "A",
                "steps": [
                    { "op": "allocate", "handle": "h" },
                    { "op": "populate", "handle": "h" },
                    { "op": "relay", "handle": "h", "frame": "F", "event": "call", "arg": "x" }
                ]
            }"#,
        )
        .unwrap();
        let report = run_scenario(&scenario, &RelayConfig::default()).unwrap();

        assert!(!report.steps[2].ok);
        assert!(report.steps[2].result.contains("boom"));
        assert_eq!(report.deliveries[0].arg.as_deref(), Some("x"));
        assert_eq!(report.counters.failures, 1);
    }

    #[test]
    fn test_unknown_frame_is_scenario_error() {
        let scenario = Scenario::from_json(
            r#"{
                "steps": [
                    { "op": "allocate", "handle": "h" },
                    { "op": "relay", "handle": "h", "frame": "missing", "event": "call" }
                ]
            }"#,
        )
        .unwrap();
        let err = run_scenario(&scenario, &RelayConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Step 1: unknown frame `missing`");
    }

    #[test]
    fn test_duplicate_callback_rejected() {
        let scenario = Scenario::from_json(
            r#"{ "callbacks": [{ "name": "A" }, { "name": "A" }], "steps": [] }"#,
        )
        .unwrap();
        assert!(matches!(
            run_scenario(&scenario, &RelayConfig::default()),
            Err(ScenarioError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_install_composes_with_frame_local() {
        let scenario = Scenario::from_json(
            r#"{
                "callbacks": [{ "name": "debugger" }],
                "managers": [{ "name": "profiler" }],
                "frames": [{ "name": "F", "local": "debugger" }],
                "steps": [
                    { "op": "install", "manager": "profiler", "frame": "F" },
                    { "op": "install", "manager": "profiler", "frame": "F" }
                ]
            }"#,
        )
        .unwrap();
        let report = run_scenario(&scenario, &RelayConfig::default()).unwrap();

        assert_eq!(report.steps[0].result, "composed");
        assert_eq!(report.steps[1].result, "already installed");
        assert_eq!(
            report.frames[0].local.as_deref(),
            Some("composed(profiler, debugger)")
        );
    }

    #[test]
    fn test_render_text_mentions_state() {
        let scenario = Scenario::from_json(LINE_REPAIR).unwrap();
        let text = run_scenario(&scenario, &RelayConfig::default())
            .unwrap()
            .render_text();
        assert!(text.contains("Global trace callback: A"));
        assert!(text.contains("line_filter(A)"));
        assert!(text.contains("1 delivered"));
    }

    #[test]
    fn test_display_matches_render_text() {
        let scenario = Scenario::from_json(r#"{ "steps": [{ "op": "allocate", "handle": "h" }] }"#)
            .unwrap();
        let report = run_scenario(&scenario, &RelayConfig::default()).unwrap();

        let text = report.render_text();
        assert_eq!(text, format!("{report}"));
        assert!(text.contains("[ok ]   0 allocate   allocated"));
        assert!(text.contains("Global trace callback: <unset>"));
        assert!(text.contains("  (none)"));
        assert!(text.ends_with("0 installed, 0 composed, 0 failed\n"));
    }

    #[test]
    fn test_frame_read_fault_from_callback() {
        let scenario = Scenario::from_json(
            r#"{
                "callbacks": [{ "name": "A", "behaviors": ["disable_line_events", "fail_frame_reads"] }],
                "frames": [{ "name": "F" }],
                "global": "A",
                "steps": [
                    { "op": "allocate", "handle": "h" },
                    { "op": "populate", "handle": "h" },
                    { "op": "relay", "handle": "h", "frame": "F", "event": "line" }
                ]
            }"#,
        )
        .unwrap();
        let report = run_scenario(&scenario, &RelayConfig::default()).unwrap();

        assert!(!report.steps[2].ok);
        assert!(report.steps[2].result.contains("line_events_enabled"));
    }
}
