//! End-to-end coverage of the concrete scenarios this interpreter and
//! orchestrator are expected to satisfy: linear transitions, guarded
//! first-match-wins dispatch, deep history restoration, clean `after`-timer
//! cancellation, parallel broadcast with cross-region escape, and the
//! orchestrator's outbound send-queue draining.

use statechart_core::context::Context;
use statechart_core::error::StatechartError;
use statechart_core::events::StatechartEvent;
use statechart_core::interpreter::{Internal, Interpreter};
use statechart_core::model::Value;
use statechart_core::orchestrator::{Orchestrator, OrchestratorConfig};
use statechart_core::parser::parse;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn interpreter_for(src: &str, context: Context) -> (Interpreter, mpsc::Receiver<Internal>) {
    let chart = Arc::new(parse(src).unwrap());
    let (tx, rx) = mpsc::channel(16);
    (Interpreter::new("m".to_string(), chart, context, tx), rx)
}

#[test]
fn linear_transition() {
    let (mut interp, _rx) = interpreter_for(
        r#"{ "id": "L", "initial": "A", "states": { "A": { "on": { "GO": "B" } }, "B": {} } }"#,
        Context::new(),
    );
    assert_eq!(interp.start(), "A");
    let r1 = interp.step("GO".into(), Value::Null);
    assert!(r1.success);
    assert_eq!(r1.new_state, "B");
    // Re-sending GO once in B is a no-op: no handler there.
    let r2 = interp.step("GO".into(), Value::Null);
    assert!(r2.success);
    assert_eq!(r2.new_state, "B");
}

#[test]
fn guarded_first_match_wins() {
    let chart_src = r#"{
        "id": "guarded",
        "initial": "start",
        "states": {
            "start": { "on": { "E": [
                { "target": "X", "cond": "g1" },
                { "target": "Y", "cond": "g2" },
                { "target": "Z" }
            ] } },
            "X": {}, "Y": {}, "Z": {}
        }
    }"#;

    let mut context = Context::new();
    context.register_guard("g1", |_, _| false);
    context.register_guard("g2", |_, _| true);
    let (mut interp, _rx) = interpreter_for(chart_src, context);
    interp.start();
    let result = interp.step("E".into(), Value::Null);
    assert_eq!(result.new_state, "Y");

    let mut context = Context::new();
    context.register_guard("g1", |_, _| false);
    context.register_guard("g2", |_, _| false);
    let (mut interp, _rx) = interpreter_for(chart_src, context);
    interp.start();
    let result = interp.step("E".into(), Value::Null);
    assert_eq!(result.new_state, "Z");

    let mut context = Context::new();
    context.register_guard("g1", |_, _| true);
    context.register_guard("g2", |_, _| true);
    let (mut interp, _rx) = interpreter_for(chart_src, context);
    interp.start();
    let result = interp.step("E".into(), Value::Null);
    assert_eq!(result.new_state, "X");
}

#[test]
fn deep_history_restores_the_exact_leaf() {
    let (mut interp, _rx) = interpreter_for(
        r##"{
            "id": "histchart",
            "initial": "A",
            "on": { "RETURN": "#x.A.hist" },
            "states": {
                "A": {
                    "initial": "B",
                    "on": { "LEAVE": "Top" },
                    "states": {
                        "hist": { "type": "history", "history": "deep" },
                        "B": {
                            "initial": "B1",
                            "states": {
                                "B1": { "on": { "GOTO_B2": "B2" } },
                                "B2": {}
                            }
                        },
                        "C": {}
                    }
                },
                "Top": {}
            }
        }"##,
        Context::new(),
    );

    assert_eq!(interp.start(), "A.B.B1");
    assert_eq!(interp.step("GOTO_B2".into(), Value::Null).new_state, "A.B.B2");
    assert_eq!(interp.step("LEAVE".into(), Value::Null).new_state, "Top");
    assert_eq!(interp.step("RETURN".into(), Value::Null).new_state, "A.B.B2");
}

#[test]
fn parallel_broadcast_then_cross_region_escape() {
    let (mut interp, _rx) = interpreter_for(
        r##"{
            "id": "parallel-demo",
            "initial": "P",
            "states": {
                "P": {
                    "type": "parallel",
                    "states": {
                        "R1": {
                            "initial": "a",
                            "states": {
                                "a": { "on": { "E": "b" } },
                                "b": { "on": { "F": "#x.done" } }
                            }
                        },
                        "R2": {
                            "initial": "x",
                            "states": {
                                "x": { "on": { "E": "y" } },
                                "y": {}
                            }
                        }
                    }
                },
                "done": {}
            }
        }"##,
        Context::new(),
    );

    interp.start();
    assert_eq!(interp.current_state(), "R1.a;R2.x");

    interp.step("E".into(), Value::Null);
    assert_eq!(interp.current_state(), "R1.b;R2.y");

    let result = interp.step("F".into(), Value::Null);
    assert_eq!(result.new_state, "done");
    assert_eq!(interp.current_state(), "done");
}

#[tokio::test(start_paused = true)]
async fn after_timer_is_cancelled_cleanly_on_exit() {
    let cancelled = Arc::new(Mutex::new(0usize));
    let cancelled_clone = Arc::clone(&cancelled);

    let (mut interp, mut internal_rx) = interpreter_for(
        r#"{
            "id": "timerchart",
            "initial": "S",
            "states": {
                "S": { "after": { "1000": "T" }, "on": { "CANCEL": "U" } },
                "T": {},
                "U": {}
            }
        }"#,
        Context::new(),
    );
    interp.subscribe(Arc::new(move |event: &StatechartEvent| {
        if matches!(event, StatechartEvent::TimerCancelled { .. }) {
            *cancelled_clone.lock().unwrap() += 1;
        }
    }));

    assert_eq!(interp.start(), "S");

    tokio::time::advance(std::time::Duration::from_millis(500)).await;
    let result = interp.step("CANCEL".into(), Value::Null);
    assert_eq!(result.new_state, "U");
    assert_eq!(*cancelled.lock().unwrap(), 1);

    tokio::time::advance(std::time::Duration::from_millis(800)).await;
    tokio::task::yield_now().await;

    assert!(internal_rx.try_recv().is_err(), "no TimerFired should have been posted");
    assert_eq!(interp.current_state(), "U");
}

#[tokio::test]
async fn orchestrator_drains_outbound_sends_in_fifo_order() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());

    let m1_src = r#"{
        "id": "M1",
        "initial": "idle",
        "states": {
            "idle": {
                "entry": [
                    { "send": { "target": "M2", "event": "PING", "payload": 1 } },
                    { "send": { "target": "M2", "event": "PING", "payload": 2 } }
                ]
            }
        }
    }"#;
    let m2_src = r#"{
        "id": "M2",
        "initial": "listening",
        "states": {
            "listening": { "on": { "PING": "listening" } }
        }
    }"#;

    let entries = Arc::new(Mutex::new(0usize));
    let entries_clone = Arc::clone(&entries);

    let (tx1, rx1) = mpsc::channel(16);
    let chart1 = Arc::new(parse(m1_src).unwrap());
    let interp1 = Interpreter::new("M1".to_string(), chart1, Context::new(), tx1);
    orchestrator.register("M1".to_string(), interp1, rx1).await.unwrap();

    let (tx2, rx2) = mpsc::channel(16);
    let chart2 = Arc::new(parse(m2_src).unwrap());
    let mut interp2 = Interpreter::new("M2".to_string(), chart2, Context::new(), tx2);
    interp2.subscribe(Arc::new(move |event: &StatechartEvent| {
        if let StatechartEvent::StateEntered { state, .. } = event {
            if state == "listening" {
                *entries_clone.lock().unwrap() += 1;
            }
        }
    }));
    orchestrator.register("M2".to_string(), interp2, rx2).await.unwrap();

    orchestrator.start("M2").await.unwrap();
    let result = orchestrator.start("M1").await.unwrap();
    assert_eq!(result, "idle");

    // Give the fire-and-forget fan-out tasks a chance to land at M2.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let snapshot = orchestrator.snapshot("M2").await.unwrap();
    assert_eq!(snapshot.state, "listening");
    // One entry on start, then one re-entry per delivered PING.
    assert_eq!(*entries.lock().unwrap(), 3);

    orchestrator.shutdown().await;
}

#[test]
fn panicking_action_aborts_the_step_without_transitioning() {
    let (mut interp, _rx) = interpreter_for(
        r#"{
            "id": "panicker",
            "initial": "A",
            "states": {
                "A": { "on": { "GO": { "target": "B", "actions": ["boom"] } } },
                "B": {}
            }
        }"#,
        {
            let mut context = Context::new();
            context.register_action("boom", |_, _| panic!("action exploded"));
            context
        },
    );

    assert_eq!(interp.start(), "A");
    let result = interp.step("GO".into(), Value::Null);
    assert!(!result.success);
    assert_eq!(result.new_state, "A");
    assert!(matches!(
        result.error,
        Some(StatechartError::ActionFailed { .. })
    ));
    // The interpreter itself is unharmed: it can still be driven afterward.
    assert_eq!(interp.current_state(), "A");
}

#[test]
fn parallel_on_done_fires_once_every_region_reaches_final() {
    let (mut interp, _rx) = interpreter_for(
        r##"{
            "id": "join",
            "initial": "P",
            "states": {
                "P": {
                    "type": "parallel",
                    "onDone": "Done",
                    "states": {
                        "R1": {
                            "initial": "a",
                            "states": {
                                "a": { "on": { "E1": "a_done" } },
                                "a_done": { "type": "final" }
                            }
                        },
                        "R2": {
                            "initial": "x",
                            "states": {
                                "x": { "on": { "E2": "x_done" } },
                                "x_done": { "type": "final" }
                            }
                        }
                    }
                },
                "Done": {}
            }
        }"##,
        Context::new(),
    );

    interp.start();
    let r1 = interp.step("E1".into(), Value::Null);
    assert!(r1.success);
    // Only one region has reached its final leaf so far.
    assert_eq!(interp.current_state(), "R1.a_done;R2.x");

    let r2 = interp.step("E2".into(), Value::Null);
    assert!(r2.success);
    assert_eq!(r2.new_state, "Done");
    assert_eq!(interp.current_state(), "Done");
}

#[test]
fn parallel_without_on_done_emits_synthetic_completion() {
    let completed = Arc::new(Mutex::new(false));
    let completed_clone = Arc::clone(&completed);

    let (mut interp, _rx) = interpreter_for(
        r#"{
            "id": "join-nodone",
            "initial": "P",
            "states": {
                "P": {
                    "type": "parallel",
                    "states": {
                        "R1": {
                            "initial": "a",
                            "states": {
                                "a": { "type": "final" }
                            }
                        },
                        "R2": {
                            "initial": "x",
                            "states": {
                                "x": { "type": "final" }
                            }
                        }
                    }
                }
            }
        }"#,
        Context::new(),
    );
    interp.subscribe(Arc::new(move |event: &StatechartEvent| {
        if matches!(event, StatechartEvent::Completed { .. }) {
            *completed_clone.lock().unwrap() = true;
        }
    }));

    interp.start();
    assert!(*completed.lock().unwrap());
}
