//! §7 error table as a closed `thiserror` enum, plus the parse/link errors
//! that are fatal to `Chart` construction.

use crate::model::{ActionName, GuardName, MachineId, ServiceName, StateId};
use thiserror::Error;

/// Fatal at parse/resolve time — a `Chart` that fails to build is never
/// handed to an interpreter.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("malformed chart source: {0}")]
    Parse(String),

    #[error("invalid reference: {kind} {name:?} referenced from state {from:?} does not resolve to a known state")]
    InvalidReference {
        kind: &'static str,
        name: String,
        from: StateId,
    },

    #[error("compound state {0:?} has no `initial` and is not parallel or all-final")]
    MissingInitial(StateId),

    #[error("duplicate state id {0:?}")]
    DuplicateState(StateId),

    #[error("history state {0:?} must be nested directly under a compound or parallel parent")]
    MisplacedHistory(StateId),

    #[error("state {state:?} uses {feature}, which the optimized-index variant does not support")]
    UnsupportedByIndex {
        state: StateId,
        feature: &'static str,
    },
}

/// Every row of §7, carried on `EventResult` (non-fatal kinds) or returned
/// directly from orchestrator calls (`NoSuchMachine`, `NotStarted`,
/// `BufferFull`) and from interpreter construction (`Definition`).
#[derive(Debug, Clone, Error)]
pub enum StatechartError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("no machine registered under id {0:?}")]
    NoSuchMachine(MachineId),

    #[error("machine {0:?} is already registered")]
    AlreadyRegistered(MachineId),

    #[error("machine {0:?} has not been started")]
    NotStarted(MachineId),

    #[error("mailbox for {0:?} is full")]
    BufferFull(MachineId),

    #[error("guard {0:?} is not registered in the context; treated as false")]
    GuardMissing(GuardName),

    #[error("action {0:?} is not registered in the context; skipped")]
    ActionMissing(ActionName),

    #[error("action {action:?} failed: {message}")]
    ActionFailed { action: ActionName, message: String },

    #[error("service {service:?} failed: {message}")]
    ServiceFailed {
        service: ServiceName,
        message: String,
    },

    #[error("`always` chain in {machine:?} exceeded depth {limit} and was terminated")]
    AlwaysLoopLimit { machine: MachineId, limit: u32 },
}

pub type Result<T, E = StatechartError> = std::result::Result<T, E>;

/// Turns a `catch_unwind` payload into a message for `ActionFailed`.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked".to_string()
    }
}
