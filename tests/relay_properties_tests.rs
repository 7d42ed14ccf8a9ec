//! Relay behaviour against the simulated host
//!
//! End-to-end checks of the relay contract: restore idempotence, empty
//! handles, self-unset handling, slot identity, line-event repair and
//! frame override composition.

use tracerelay::sim_runtime::{Behavior, SimRuntime};
use tracerelay::{
    InstallOutcome, LocalTraceWrapper, RelayOutcome, SafeInvoker, SnapshotStore, StoreConfig,
    TraceCallable, TraceEvent, TraceRelay,
};

fn relay_over(runtime: SimRuntime) -> TraceRelay<SimRuntime> {
    TraceRelay::new(runtime)
}

#[test]
fn test_restore_on_empty_handle_is_noop() {
    let mut relay = relay_over(SimRuntime::new());
    let current = relay.runtime().callback("current");
    relay.runtime().set_global(Some(current.clone()));

    let handle = relay.allocate().unwrap();
    relay.restore(&handle);

    assert!(relay.runtime().global().unwrap().is_same(&current));
    assert!(relay.is_empty(&handle));
}

#[test]
fn test_restore_twice_equals_restore_once() {
    let mut relay = relay_over(SimRuntime::new());
    let saved = relay.runtime().callback("saved");
    relay.runtime().set_global(Some(saved.clone()));
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let profiler = relay.runtime().callback("profiler");
    relay.runtime().set_global(Some(profiler));
    relay.restore(&handle);
    assert!(relay.runtime().global().unwrap().is_same(&saved));

    // Someone else takes the slot; a second restore must not fight them.
    let later = relay.runtime().callback("later");
    relay.runtime().set_global(Some(later.clone()));
    relay.restore(&handle);
    assert!(relay.runtime().global().unwrap().is_same(&later));
}

#[test]
fn test_relay_with_empty_handle_touches_nothing() {
    let mut relay = relay_over(SimRuntime::new());
    let handle = relay.allocate().unwrap();
    let frame = relay.runtime().frame("F");
    frame.set_line_events(false);
    let disabler = relay.runtime().line_disabler();

    for event in [TraceEvent::Call, TraceEvent::Line, TraceEvent::Return] {
        let outcome = relay.relay(&disabler, &handle, &frame, event, None).unwrap();
        assert_eq!(outcome, RelayOutcome::Skipped);
    }

    assert!(relay.runtime().deliveries().is_empty());
    assert!(frame.local().is_none());
    assert!(!frame.line_events());
}

#[test]
fn test_populated_none_is_treated_as_empty() {
    let mut relay = relay_over(SimRuntime::new());
    relay
        .runtime()
        .set_global(Some(tracerelay::sim_runtime::SimCallback::none()));
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);
    assert!(relay.is_empty(&handle));

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    let outcome = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Call, None)
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Skipped);
}

#[test]
fn test_self_unset_leaves_slot_and_handle_empty() {
    let runtime = SimRuntime::new();
    let previous = runtime.scripted("previous", vec![Behavior::UnsetGlobal]);
    runtime.set_global(Some(previous));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    let outcome = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Call, None)
        .unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::Delivered {
            self_unset: true,
            line_events_repaired: false
        }
    );
    assert!(relay.is_empty(&handle));
    assert!(relay.runtime().global().is_none());

    // Later events have nowhere to go.
    let again = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Call, None)
        .unwrap();
    assert_eq!(again, RelayOutcome::Skipped);
    assert_eq!(relay.runtime().deliveries().len(), 1);
}

#[test]
fn test_quiet_relay_preserves_slot_identity() {
    let runtime = SimRuntime::new();
    let previous = runtime.callback("previous");
    runtime.set_global(Some(previous.clone()));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    relay
        .relay(&disabler, &handle, &frame, TraceEvent::Return, None)
        .unwrap();

    let after = relay.runtime().global().unwrap();
    assert!(after.is_same(&previous));
    assert_eq!(after.id(), previous.id());
}

#[test]
fn test_replaced_slot_is_reasserted() {
    let runtime = SimRuntime::new();
    let previous = runtime.scripted(
        "previous",
        vec![Behavior::ReplaceGlobal("intruder".to_string())],
    );
    runtime.set_global(Some(previous.clone()));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    relay
        .relay(&disabler, &handle, &frame, TraceEvent::Call, None)
        .unwrap();

    assert!(relay.runtime().global().unwrap().is_same(&previous));
    assert!(!relay.is_empty(&handle));
}

#[test]
fn test_line_flag_repair_wraps_existing_override() {
    let runtime = SimRuntime::new();
    let previous = runtime.scripted("previous", vec![Behavior::DisableLineEvents]);
    runtime.set_global(Some(previous));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let existing = relay.runtime().callback("existing");
    frame.set_local(Some(existing.clone()));
    let disabler = relay.runtime().line_disabler();

    relay
        .relay(&disabler, &handle, &frame, TraceEvent::Line, None)
        .unwrap();

    assert!(frame.line_events());
    let local = frame.local().unwrap();
    assert!(!local.is_same(&existing));
    assert!(local.line_filter_of().unwrap().is_same(&existing));
}

#[test]
fn test_end_to_end_line_repair() {
    let runtime = SimRuntime::new();
    let a = runtime.scripted("A", vec![Behavior::DisableLineEvents]);
    runtime.set_global(Some(a.clone()));
    let mut relay = relay_over(runtime);

    let frame = relay.runtime().frame("F");
    assert!(frame.local().is_none());
    assert!(frame.line_events());

    let handle = relay.allocate().unwrap();
    relay.populate(&handle);
    assert!(relay.store().callback(&handle).unwrap().is_same(&a));

    let disabler = relay.runtime().line_disabler();
    let outcome = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Line, None)
        .unwrap();

    assert!(outcome.was_delivered());
    assert!(frame.line_events());
    let local = frame.local().expect("override installed");
    assert!(local.line_filter_of().unwrap().is_same(&a));
    assert_eq!(local.describe(), "line_filter(A)");
}

#[test]
fn test_unset_and_disable_both_reconciled() {
    let runtime = SimRuntime::new();
    let a = runtime.scripted(
        "A",
        vec![Behavior::UnsetGlobal, Behavior::DisableLineEvents],
    );
    runtime.set_global(Some(a));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    let outcome = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Line, None)
        .unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::Delivered {
            self_unset: true,
            line_events_repaired: true
        }
    );
    assert!(relay.runtime().global().is_none());
    assert!(relay.is_empty(&handle));
    assert!(frame.line_events());
    assert!(frame.local().is_some());
}

#[test]
fn test_raising_callback_reports_failure_and_reconciles() {
    let runtime = SimRuntime::new();
    let a = runtime.scripted(
        "A",
        vec![
            Behavior::DisableLineEvents,
            Behavior::Raise("kaboom".to_string()),
        ],
    );
    runtime.set_global(Some(a.clone()));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    let err = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Call, None)
        .unwrap_err();

    assert!(err.is_relay_failure());
    assert!(err.to_string().contains("kaboom"));
    assert!(relay.runtime().global().unwrap().is_same(&a));
    assert!(frame.line_events());
    assert_eq!(relay.counters().failures, 1);
}

#[test]
fn test_frame_write_failure_is_attribute_error() {
    let runtime = SimRuntime::new();
    let a = runtime.scripted("A", vec![Behavior::DisableLineEvents]);
    runtime.set_global(Some(a));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    frame.fail_writes(true);
    let disabler = relay.runtime().line_disabler();
    let err = relay
        .relay(&disabler, &handle, &frame, TraceEvent::Line, None)
        .unwrap_err();

    assert!(!err.is_relay_failure());
    assert!(err.to_string().contains("line_events_enabled"));
}

#[test]
fn test_install_composes_with_existing_override() {
    let mut relay = relay_over(SimRuntime::new());
    let manager = relay.runtime().manager("profiler");
    let frame = relay.runtime().frame("F");
    let x = relay.runtime().callback("X");
    frame.set_local(Some(x.clone()));

    let outcome = relay.install(Some(&manager), Some(&frame));
    assert_eq!(outcome, InstallOutcome::Composed);

    let local = frame.local().unwrap();
    assert!(!local.is_same(&x));
    assert!(!local.is_same(&manager.as_callback()));
    assert!(local.composed_inner().unwrap().is_same(&x));
    assert!(manager.owns(&local));
}

#[test]
fn test_install_twice_does_not_double_wrap() {
    let mut relay = relay_over(SimRuntime::new());
    let manager = relay.runtime().manager("profiler");
    let frame = relay.runtime().frame("F");
    frame.set_local(Some(relay.runtime().callback("X")));

    relay.install(Some(&manager), Some(&frame));
    let first = frame.local().unwrap();
    let outcome = relay.install(Some(&manager), Some(&frame));

    assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
    assert!(frame.local().unwrap().is_same(&first));
}

#[test]
fn test_install_on_bare_frame_sets_manager() {
    let mut relay = relay_over(SimRuntime::new());
    let manager = relay.runtime().manager("profiler");
    let frame = relay.runtime().frame("F");

    assert_eq!(
        relay.install(Some(&manager), Some(&frame)),
        InstallOutcome::Installed
    );
    assert!(frame.local().unwrap().is_same(&manager.as_callback()));
    assert_eq!(
        relay.install(Some(&manager), Some(&frame)),
        InstallOutcome::AlreadyInstalled
    );
}

#[test]
fn test_install_without_frame_or_manager_is_skipped() {
    let mut relay = relay_over(SimRuntime::new());
    let manager = relay.runtime().manager("profiler");
    let frame = relay.runtime().frame("F");

    assert_eq!(
        relay.install(Some(&manager), None),
        InstallOutcome::Skipped
    );
    assert_eq!(
        relay.install::<tracerelay::sim_runtime::SimManager>(None, Some(&frame)),
        InstallOutcome::Skipped
    );
    assert!(frame.local().is_none());
}

#[test]
fn test_store_reuses_freed_slots() {
    let runtime = SimRuntime::new();
    let mut store = SnapshotStore::new(StoreConfig::new(2));
    let first = store.allocate().unwrap();
    let index = first.index();
    store.free(first);
    let second = store.allocate().unwrap();
    assert_eq!(second.index(), index);

    store.populate(&second, &runtime);
    assert!(store.is_empty(&second));
    let frame = runtime.frame("F");
    let disabler = runtime.line_disabler();
    let outcome = SafeInvoker::new(&runtime)
        .relay(&disabler, &mut store, &second, &frame, TraceEvent::Call, None)
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Skipped);
}

#[test]
fn test_events_reach_callback_in_order() {
    let runtime = SimRuntime::new();
    let a = runtime.callback("A");
    runtime.set_global(Some(a));
    let mut relay = relay_over(runtime);
    let handle = relay.allocate().unwrap();
    relay.populate(&handle);

    let frame = relay.runtime().frame("F");
    let disabler = relay.runtime().line_disabler();
    let arg = "value".to_string();
    for event in [
        TraceEvent::Call,
        TraceEvent::Line,
        TraceEvent::CCall,
        TraceEvent::Unknown(42),
        TraceEvent::Return,
    ] {
        relay
            .relay(&disabler, &handle, &frame, event, Some(&arg))
            .unwrap();
    }

    let events: Vec<String> = relay
        .runtime()
        .deliveries()
        .into_iter()
        .map(|delivery| delivery.event)
        .collect();
    assert_eq!(events, ["call", "line", "c_call", "call", "return"]);
}
