//! Listener-visible lifecycle events and read-only snapshots, generalized
//! from the teacher's `RuntimeEvent` audit-trail enum (`bpmn-lite-core`'s
//! `events.rs`) onto state-chart semantics.

use crate::error::StatechartError;
use crate::model::{ContextValues, EventName, MachineId, ServiceName, StateId, Value};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum StatechartEvent {
    Started {
        machine: MachineId,
        state: StateId,
    },
    StateEntered {
        machine: MachineId,
        state: StateId,
    },
    StateExited {
        machine: MachineId,
        state: StateId,
    },
    Transitioned {
        machine: MachineId,
        event: EventName,
        from: Vec<StateId>,
        to: Vec<StateId>,
    },
    TimerScheduled {
        machine: MachineId,
        state: StateId,
        delay_ms: u64,
    },
    TimerFired {
        machine: MachineId,
        state: StateId,
        delay_ms: u64,
    },
    TimerCancelled {
        machine: MachineId,
        state: StateId,
    },
    ServiceStarted {
        machine: MachineId,
        state: StateId,
        service: ServiceName,
    },
    ServiceCompleted {
        machine: MachineId,
        state: StateId,
        service: ServiceName,
    },
    ServiceFailed {
        machine: MachineId,
        state: StateId,
        service: ServiceName,
        message: String,
    },
    Warning {
        machine: MachineId,
        error: StatechartError,
    },
    Completed {
        machine: MachineId,
        output: Option<Value>,
    },
    Stopped {
        machine: MachineId,
    },
}

pub type Listener = Arc<dyn Fn(&StatechartEvent) + Send + Sync>;

/// §4.4.8 read-only projection of an instance.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Active configuration, joined; parallel regions are `;`-separated and
    /// sorted by region id (§4.4.4).
    pub state: String,
    pub context: ContextValues,
    pub running: bool,
    pub meta: Vec<Value>,
    pub tags: Vec<String>,
    pub output: Option<Value>,
    pub description: Option<String>,
}

/// Returned by every `Orchestrator::send_event` call (§4.3).
#[derive(Clone, Debug)]
pub struct EventResult {
    pub success: bool,
    pub new_state: StateId,
    pub error: Option<StatechartError>,
}

impl EventResult {
    pub fn ok(new_state: impl Into<StateId>) -> Self {
        Self {
            success: true,
            new_state: new_state.into(),
            error: None,
        }
    }

    pub fn err(new_state: impl Into<StateId>, error: StatechartError) -> Self {
        Self {
            success: false,
            new_state: new_state.into(),
            error: Some(error),
        }
    }
}
