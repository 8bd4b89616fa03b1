//! C6 — the event-bus orchestrator (§4.3). Generalizes the teacher's
//! `BpmnLiteEngine` facade (`engine.rs`) from a single shared store onto a
//! process-wide registry of independently-owned interpreter instances: each
//! registered machine gets its own dedicated task draining its own mailbox,
//! so the registry itself (`MachineId -> mailbox`) is the only state this
//! module shares, guarded the way the teacher's `MemoryStore` guards its
//! `Inner` (`tokio::sync::RwLock`).

use crate::context::PendingSend;
use crate::error::StatechartError;
use crate::events::{EventResult, Snapshot};
use crate::interpreter::{Internal, Interpreter};
use crate::model::{EventName, MachineId, StateId, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Knobs with no on-disk/env form (§6): every value here is a constructor
/// parameter with a documented default.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of each instance's event mailbox (`mpsc` channel).
    pub mailbox_capacity: usize,
    /// Events queued while a machine is registered but not yet started
    /// (§4.3 "buffered until start"), bounded separately from the mailbox
    /// itself since a not-yet-started instance never drains it.
    pub pending_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            pending_capacity: 256,
        }
    }
}

enum Inbound {
    Event {
        event: EventName,
        payload: Value,
        reply: oneshot::Sender<EventResult>,
    },
    Start {
        reply: oneshot::Sender<StateId>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
}

struct Registered {
    tx: mpsc::Sender<Inbound>,
    worker: tokio::task::JoinHandle<()>,
}

/// Process-wide registry `{MachineId -> Interpreter}` (§4.3). Construction
/// is explicit (`new`/`shutdown`) rather than a global singleton, so a host
/// process may run more than one — e.g. one per test.
pub struct Orchestrator {
    config: OrchestratorConfig,
    instances: RwLock<HashMap<MachineId, Registered>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// Registers `interpreter` under `machine_id` and spawns its dedicated
    /// worker task. Idempotent only in the sense of rejecting a collision —
    /// replacing a live machine fails (§4.3).
    pub async fn register(
        self: &Arc<Self>,
        machine_id: MachineId,
        interpreter: Interpreter,
        internal_rx: mpsc::Receiver<Internal>,
    ) -> Result<(), StatechartError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&machine_id) {
            return Err(StatechartError::AlreadyRegistered(machine_id));
        }
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let orchestrator = Arc::clone(self);
        let id = machine_id.clone();
        let pending_capacity = self.config.pending_capacity;
        let worker = tokio::spawn(async move {
            run_instance(orchestrator, id, interpreter, rx, internal_rx, pending_capacity).await;
        });
        instances.insert(machine_id, Registered { tx, worker });
        Ok(())
    }

    /// Stops the interpreter (if registered) and drops its worker task.
    pub async fn unregister(&self, machine_id: &str) -> Result<(), StatechartError> {
        let registered = {
            let mut instances = self.instances.write().await;
            instances.remove(machine_id)
        };
        match registered {
            Some(r) => {
                let (tx, rx) = oneshot::channel();
                if r.tx.send(Inbound::Stop { reply: tx }).await.is_ok() {
                    let _ = rx.await;
                }
                drop(r.tx);
                let _ = r.worker.await;
                Ok(())
            }
            None => Err(StatechartError::NoSuchMachine(machine_id.to_string())),
        }
    }

    pub async fn start(&self, machine_id: &str) -> Result<StateId, StatechartError> {
        let tx = self.mailbox(machine_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Inbound::Start { reply: reply_tx })
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))
    }

    pub async fn stop(&self, machine_id: &str) -> Result<(), StatechartError> {
        let tx = self.mailbox(machine_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Inbound::Stop { reply: reply_tx })
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))
    }

    pub async fn snapshot(&self, machine_id: &str) -> Result<Snapshot, StatechartError> {
        let tx = self.mailbox(machine_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Inbound::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| StatechartError::NoSuchMachine(machine_id.to_string()))
    }

    /// The sole public entry point for delivering an event (§4.3). `from`
    /// is carried only for `tracing` spans — the wire format has no sender
    /// authentication.
    pub async fn send_event(
        &self,
        from: Option<&str>,
        to: &str,
        event: EventName,
        payload: Value,
    ) -> EventResult {
        let span = tracing::debug_span!("send_event", from, to, event = %event);
        let _enter = span.enter();

        let tx = match self.mailbox(to).await {
            Ok(tx) => tx,
            Err(err) => {
                tracing::warn!(to, "no such machine");
                return EventResult::err(String::new(), err);
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .try_send(Inbound::Event {
                event,
                payload,
                reply: reply_tx,
            })
            .is_err()
        {
            tracing::warn!(to, "mailbox full");
            return EventResult::err(
                String::new(),
                StatechartError::BufferFull(to.to_string()),
            );
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => EventResult::err(String::new(), StatechartError::NoSuchMachine(to.to_string())),
        }
    }

    pub async fn shutdown(&self) {
        let drained: Vec<Registered> = {
            let mut instances = self.instances.write().await;
            instances.drain().map(|(_, r)| r).collect()
        };
        for r in drained {
            drop(r.tx);
            let _ = r.worker.await;
        }
    }

    async fn mailbox(&self, machine_id: &str) -> Result<mpsc::Sender<Inbound>, StatechartError> {
        self.instances
            .read()
            .await
            .get(machine_id)
            .map(|r| r.tx.clone())
            .ok_or_else(|| StatechartError::NoSuchMachine(machine_id.to_string()))
    }
}

/// The dedicated task owning one `Interpreter` exclusively (§5): every
/// event and internal callback for this machine passes through here, so
/// the interpreter itself never needs a lock. Events that arrive before
/// `start` are buffered and replayed in order once it does (§4.3).
async fn run_instance(
    orchestrator: Arc<Orchestrator>,
    machine_id: MachineId,
    mut interpreter: Interpreter,
    mut rx: mpsc::Receiver<Inbound>,
    mut internal_rx: mpsc::Receiver<Internal>,
    pending_capacity: usize,
) {
    let mut pending: VecDeque<(EventName, Value, oneshot::Sender<EventResult>)> = VecDeque::new();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    Inbound::Start { reply } => {
                        let state = interpreter.start();
                        fan_out(&orchestrator, &machine_id, interpreter.take_pending_sends());
                        while let Some((event, payload, reply)) = pending.pop_front() {
                            let result = interpreter.step(event, payload);
                            fan_out(&orchestrator, &machine_id, interpreter.take_pending_sends());
                            let _ = reply.send(result);
                        }
                        let _ = reply.send(state);
                    }
                    Inbound::Stop { reply } => {
                        interpreter.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Inbound::Snapshot { reply } => {
                        let _ = reply.send(interpreter.snapshot());
                    }
                    Inbound::Event { event, payload, reply } => {
                        if interpreter.is_running() {
                            let result = interpreter.step(event, payload);
                            fan_out(&orchestrator, &machine_id, interpreter.take_pending_sends());
                            let _ = reply.send(result);
                        } else if pending.len() >= pending_capacity {
                            let _ = reply.send(EventResult::err(
                                interpreter.current_state(),
                                StatechartError::BufferFull(machine_id.clone()),
                            ));
                        } else {
                            pending.push_back((event, payload, reply));
                        }
                    }
                }
            }
            msg = internal_rx.recv() => {
                let Some(msg) = msg else { continue };
                interpreter.handle_internal(msg);
                fan_out(&orchestrator, &machine_id, interpreter.take_pending_sends());
            }
            else => break,
        }
    }
}

/// Drains a step's outbound `request_send` queue into the orchestrator
/// (§4.4.2 step 4, §5 "committed only after the originating step's state
/// update commits"). Dispatched fire-and-forget per machine — their
/// results are not awaited by the send that produced them.
fn fan_out(orchestrator: &Arc<Orchestrator>, from: &str, sends: Vec<PendingSend>) {
    for send in sends {
        let orchestrator = Arc::clone(orchestrator);
        let from = from.to_string();
        tokio::spawn(async move {
            orchestrator
                .send_event(Some(&from), &send.target, send.event, send.payload)
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::Arc as StdArc;
    use tokio::sync::mpsc;

    fn linear_chart() -> StdArc<crate::model::Chart> {
        let src = r#"{
            "id": "m",
            "initial": "a",
            "states": {
                "a": { "on": { "go": "b" } },
                "b": {}
            }
        }"#;
        StdArc::new(crate::parser::parse(src).unwrap())
    }

    fn spawn_machine(
        orchestrator: &Arc<Orchestrator>,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), StatechartError>> + 'static {
        let orchestrator = Arc::clone(orchestrator);
        let id = id.to_string();
        let chart = linear_chart();
        async move {
            let (internal_tx, internal_rx) = mpsc::channel(16);
            let interpreter = Interpreter::new(id.clone(), chart, Context::new(), internal_tx);
            orchestrator.register(id, interpreter, internal_rx).await
        }
    }

    #[tokio::test]
    async fn start_then_send_event_transitions() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        spawn_machine(&orchestrator, "m1").await.unwrap();

        let state = orchestrator.start("m1").await.unwrap();
        assert_eq!(state, "a");

        let result = orchestrator
            .send_event(None, "m1", "go".to_string(), Value::Null)
            .await;
        assert!(result.success);
        assert_eq!(result.new_state, "b");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_target_is_no_such_machine() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let result = orchestrator
            .send_event(None, "ghost", "go".to_string(), Value::Null)
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(StatechartError::NoSuchMachine(_))));
    }

    #[tokio::test]
    async fn event_before_start_is_buffered_then_replayed() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        spawn_machine(&orchestrator, "m2").await.unwrap();

        let orch2 = Arc::clone(&orchestrator);
        let send_fut = tokio::spawn(async move {
            orch2
                .send_event(None, "m2", "go".to_string(), Value::Null)
                .await
        });

        // give the mailbox a moment to actually buffer before start fires.
        tokio::task::yield_now().await;
        let started = orchestrator.start("m2").await.unwrap();
        assert_eq!(started, "a");

        let result = send_fut.await.unwrap();
        assert!(result.success);
        assert_eq!(result.new_state, "b");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn registering_same_id_twice_fails() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        spawn_machine(&orchestrator, "dup").await.unwrap();
        let err = spawn_machine(&orchestrator, "dup").await;
        assert!(matches!(err, Err(StatechartError::AlreadyRegistered(_))));
        orchestrator.shutdown().await;
    }
}
