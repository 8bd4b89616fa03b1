//! C3 — the per-instance registry of named actions/guards/services plus the
//! mutable key/value context, generalized from the teacher's
//! `ProcessStore` trait-of-async-operations shape onto user-registered
//! callbacks.

use crate::cancel::CancelToken;
use crate::model::{ActionName, ContextValues, EventName, GuardName, MachineId, ServiceName, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of an instance handed to guards.
pub struct SnapshotView<'a> {
    pub state: &'a str,
    pub config: &'a [String],
    pub values: &'a ContextValues,
}

impl SnapshotView<'_> {
    pub fn in_state(&self, id: &str) -> bool {
        self.config.iter().any(|s| crate::model::Chart::is_descendant(s, id))
    }
}

pub type GuardFn = dyn Fn(&SnapshotView<'_>, &Value) -> bool + Send + Sync;
pub type ActionFn = dyn Fn(&mut ActionCtx<'_>, &Value) + Send + Sync;

/// Queued by an action via `request_send`; drained by the orchestrator only
/// after the originating step fully commits (§5 ordering guarantee).
#[derive(Clone, Debug)]
pub struct PendingSend {
    pub target: MachineId,
    pub event: EventName,
    pub payload: Value,
}

/// Mutable handle actions receive. Actions never deliver events
/// synchronously — `request_send` only enqueues.
pub struct ActionCtx<'a> {
    pub machine: &'a MachineId,
    pub values: &'a mut ContextValues,
    pending_sends: &'a mut Vec<PendingSend>,
}

impl<'a> ActionCtx<'a> {
    pub fn new(machine: &'a MachineId, values: &'a mut ContextValues, pending_sends: &'a mut Vec<PendingSend>) -> Self {
        Self {
            machine,
            values,
            pending_sends,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn request_send(&mut self, target: MachineId, event: EventName, payload: Value) {
        self.pending_sends.push(PendingSend {
            target,
            event,
            payload,
        });
    }
}

/// Input handed to an invoked service.
pub struct ServiceCtx {
    pub machine: MachineId,
    pub state: String,
    /// Snapshot of context values at the moment of invocation.
    pub values: ContextValues,
    pub cancel: CancelToken,
}

/// A long-running task started on entry to an `invoke`-bearing state.
#[async_trait]
pub trait Service: Send + Sync {
    async fn run(&self, ctx: ServiceCtx) -> std::result::Result<Value, String>;
}

/// Adapts a plain async closure into a `Service`.
pub struct FnService<F>(pub F);

#[async_trait]
impl<F, Fut> Service for FnService<F>
where
    F: Fn(ServiceCtx) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = std::result::Result<Value, String>> + Send,
{
    async fn run(&self, ctx: ServiceCtx) -> std::result::Result<Value, String> {
        (self.0)(ctx).await
    }
}

/// Per-instance registry of actions/guards/services, plus the context
/// values actions mutate. Read-only after startup except for `values`,
/// which is only ever mutated from within action handlers running on the
/// owning interpreter's task (§5).
#[derive(Default)]
pub struct Context {
    actions: HashMap<ActionName, Arc<ActionFn>>,
    guards: HashMap<GuardName, Arc<GuardFn>>,
    services: HashMap<ServiceName, Arc<dyn Service>>,
    pub values: ContextValues,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut ActionCtx<'_>, &Value) + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
    }

    pub fn register_guard<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&SnapshotView<'_>, &Value) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(f));
    }

    pub fn register_service(&mut self, name: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(name.into(), service);
    }

    pub fn action(&self, name: &str) -> Option<Arc<ActionFn>> {
        self.actions.get(name).cloned()
    }

    pub fn guard(&self, name: &str) -> Option<Arc<GuardFn>> {
        self.guards.get(name).cloned()
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }
}
