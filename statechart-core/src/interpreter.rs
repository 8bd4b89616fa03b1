//! C4 — the interpreter core: one instance per running machine, driving the
//! event-step algorithm of §4.4.2/4.4.3 against an immutable [`Chart`].
//! Owned exclusively by one task (see `orchestrator`); nothing here is
//! `Sync`-shared, so the step itself needs no locking.

use crate::cancel::CancelToken;
use crate::context::{ActionCtx, Context, PendingSend, SnapshotView};
use crate::error::{panic_message, StatechartError};
use crate::events::{Listener, Snapshot, StatechartEvent};
use crate::model::{
    ActionRef, Chart, EventName, HistoryKind, MachineId, StateId, StateKind, Transition, Value,
};
use crate::region;
use crate::timer::{self, TimerHandle};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages a timer or invoked service posts back into its own instance's
/// mailbox once it fires/completes — never touches interpreter state
/// directly (§5: the interpreter never awaits inside its own step).
#[derive(Debug)]
pub enum Internal {
    TimerFired { state: StateId, delay_ms: u64 },
    ServiceDone {
        state: StateId,
        result: Result<Value, String>,
    },
}

pub struct Interpreter {
    pub machine_id: MachineId,
    chart: Arc<Chart>,
    context: Context,
    config: Vec<StateId>,
    history: HashMap<StateId, Vec<StateId>>,
    timers: HashMap<(StateId, u64), TimerHandle>,
    invokes: HashMap<StateId, CancelToken>,
    running: bool,
    output: Option<Value>,
    listeners: Vec<Listener>,
    pending_sends: Vec<PendingSend>,
    self_tx: mpsc::Sender<Internal>,
    always_cap: u32,
}

impl Interpreter {
    pub fn new(
        machine_id: MachineId,
        chart: Arc<Chart>,
        context: Context,
        self_tx: mpsc::Sender<Internal>,
    ) -> Self {
        Self {
            machine_id,
            chart,
            context,
            config: Vec::new(),
            history: HashMap::new(),
            timers: HashMap::new(),
            invokes: HashMap::new(),
            running: false,
            output: None,
            listeners: Vec::new(),
            pending_sends: Vec::new(),
            self_tx,
            always_cap: 10,
        }
    }

    pub fn with_always_cap(mut self, cap: u32) -> Self {
        self.always_cap = cap;
        self
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub fn unsubscribe(&mut self, listener: &Listener) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_state(&self) -> String {
        region::render_configuration(&self.config)
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut meta = Vec::new();
        let mut tags = Vec::new();
        let mut description = None;
        for leaf in &self.config {
            for ancestor in self.chart.ancestors(leaf) {
                if let Some(node) = self.chart.state(ancestor) {
                    if let Some(m) = &node.meta {
                        meta.push(m.clone());
                    }
                    tags.extend(node.tags.iter().cloned());
                    if description.is_none() {
                        description = node.description.clone();
                    }
                }
            }
        }
        Snapshot {
            state: self.current_state(),
            context: self.context.values.clone(),
            running: self.running,
            meta,
            tags,
            output: self.output.clone(),
            description,
        }
    }

    /// Drains actions' queued cross-instance sends. Called by the
    /// orchestrator immediately after a step/internal message commits.
    pub fn take_pending_sends(&mut self) -> Vec<PendingSend> {
        std::mem::take(&mut self.pending_sends)
    }

    /// §4.4.1/6: enters the chart's initial configuration, running entry
    /// actions and settling any `always` chain, returning the resulting
    /// rendered state. Idempotent no-op if already running.
    pub fn start(&mut self) -> StateId {
        if self.running {
            return self.current_state();
        }
        self.running = true;
        let root = crate::model::ROOT.to_string();
        let mut entry_states = vec![root.clone()];
        expand_collect(&self.chart, &root, &mut entry_states);
        let leaves: Vec<StateId> = entry_states
            .iter()
            .filter(|s| self.chart.state(s).map(|n| n.is_leaf()).unwrap_or(true))
            .cloned()
            .collect();
        self.config.extend(leaves);
        self.config.sort();
        self.config.dedup();
        let mut depth = self.always_cap;
        if let Err(error) = self.enter_and_settle(entry_states, &mut depth) {
            self.emit(StatechartEvent::Warning {
                machine: self.machine_id.clone(),
                error,
            });
        }
        self.emit(StatechartEvent::Started {
            machine: self.machine_id.clone(),
            state: self.current_state(),
        });
        self.current_state()
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        for leaf in self.config.clone() {
            if let Err(error) = self.exit_chain(&leaf, crate::model::ROOT) {
                self.emit(StatechartEvent::Warning {
                    machine: self.machine_id.clone(),
                    error,
                });
            }
        }
        self.config.clear();
        self.running = false;
        self.emit(StatechartEvent::Stopped {
            machine: self.machine_id.clone(),
        });
    }

    /// §4.4.2: the event-step algorithm.
    pub fn step(&mut self, event: EventName, payload: Value) -> crate::events::EventResult {
        if !self.running {
            return crate::events::EventResult::err(
                self.current_state(),
                StatechartError::NotStarted(self.machine_id.clone()),
            );
        }

        let mut groups: std::collections::BTreeMap<StateId, Vec<StateId>> =
            std::collections::BTreeMap::new();
        for leaf in self.config.clone() {
            if let Some(scope) = self.scope_for(&leaf, &event) {
                groups.entry(scope).or_default().push(leaf);
            }
        }

        if groups.is_empty() {
            return crate::events::EventResult::ok(self.current_state());
        }

        for (scope, _leaves) in groups {
            let node = match self.chart.state(&scope) {
                Some(n) => n.clone(),
                None => continue,
            };
            let transitions = match node.on.get(&event) {
                Some(ts) => ts.clone(),
                None => continue,
            };
            if let Some(t) = self.select_transition(&transitions, &payload) {
                self.emit(StatechartEvent::Transitioned {
                    machine: self.machine_id.clone(),
                    event: event.clone(),
                    from: self.config.clone(),
                    to: t.targets.clone(),
                });
                let parallel = node.kind == StateKind::Parallel;
                if let Err(error) = self.apply_transition(&scope, parallel, &t, &payload) {
                    return crate::events::EventResult::err(self.current_state(), error);
                }
            }
        }

        crate::events::EventResult::ok(self.current_state())
    }

    /// Runs a matched transition's actions then dispatches its target(s),
    /// aborting at the last committed point if an action panics (§4.3/§7).
    fn apply_transition(
        &mut self,
        scope: &str,
        parallel: bool,
        t: &Transition,
        payload: &Value,
    ) -> Result<(), StatechartError> {
        self.run_actions(&t.actions, payload)?;
        if t.internal || t.targets.is_empty() {
            return Ok(());
        }
        let mut depth = self.always_cap;
        if t.targets.len() > 1 && parallel {
            for target in &t.targets {
                self.perform_region_transition(scope, target, &mut depth)?;
            }
            Ok(())
        } else {
            self.perform_transition(scope, &t.targets[0], &mut depth)
        }
    }

    /// Entry point for timer/service callbacks (§4.4.6/4.4.7).
    pub fn handle_internal(&mut self, msg: Internal) {
        if !self.running {
            return;
        }
        match msg {
            Internal::TimerFired { state, delay_ms } => {
                if !self.timers.contains_key(&(state.clone(), delay_ms)) {
                    return; // cancelled/stale
                }
                self.timers.remove(&(state.clone(), delay_ms));
                self.emit(StatechartEvent::TimerFired {
                    machine: self.machine_id.clone(),
                    state: state.clone(),
                    delay_ms,
                });
                let transitions = match self.chart.state(&state).and_then(|n| n.after.get(&delay_ms))
                {
                    Some(ts) => ts.clone(),
                    None => return,
                };
                if let Some(t) = self.select_transition(&transitions, &Value::Null) {
                    if let Err(error) = self.apply_transition(&state, false, &t, &Value::Null) {
                        self.emit(StatechartEvent::Warning {
                            machine: self.machine_id.clone(),
                            error,
                        });
                    }
                }
            }
            Internal::ServiceDone { state, result } => {
                if !self.invokes.contains_key(&state) {
                    return; // service for an already-exited state
                }
                self.invokes.remove(&state);
                let node = match self.chart.state(&state) {
                    Some(n) => n.clone(),
                    None => return,
                };
                let invoke = match &node.invoke {
                    Some(i) => i.clone(),
                    None => return,
                };
                match result {
                    Ok(value) => {
                        self.emit(StatechartEvent::ServiceCompleted {
                            machine: self.machine_id.clone(),
                            state: state.clone(),
                            service: invoke.service.clone(),
                        });
                        if let Some(t) = invoke.on_done.clone() {
                            if let Err(error) = self.apply_transition(&state, false, &t, &value) {
                                self.emit(StatechartEvent::Warning {
                                    machine: self.machine_id.clone(),
                                    error,
                                });
                            }
                        }
                    }
                    Err(message) => {
                        self.emit(StatechartEvent::ServiceFailed {
                            machine: self.machine_id.clone(),
                            state: state.clone(),
                            service: invoke.service.clone(),
                            message: message.clone(),
                        });
                        if let Some(t) = invoke.on_error.clone() {
                            let payload = Value::String(message.clone());
                            if let Err(error) = self.apply_transition(&state, false, &t, &payload)
                            {
                                self.emit(StatechartEvent::Warning {
                                    machine: self.machine_id.clone(),
                                    error,
                                });
                            }
                        } else {
                            self.emit(StatechartEvent::Warning {
                                machine: self.machine_id.clone(),
                                error: StatechartError::ServiceFailed {
                                    service: invoke.service.clone(),
                                    message,
                                },
                            });
                        }
                    }
                }
            }
        }
    }

    fn scope_for(&self, leaf: &str, event: &str) -> Option<StateId> {
        for ancestor in self.chart.ancestors(leaf) {
            if let Some(node) = self.chart.state(ancestor) {
                if node.on.contains_key(event) {
                    return Some(ancestor.to_string());
                }
            }
        }
        None
    }

    fn select_transition(&self, transitions: &[Transition], payload: &Value) -> Option<Transition> {
        let rendered = self.current_state();
        for t in transitions {
            if let Some(guard) = &t.guard {
                let view = SnapshotView {
                    state: &rendered,
                    config: &self.config,
                    values: &self.context.values,
                };
                match self.context.guard(guard) {
                    Some(f) => {
                        if !f(&view, payload) {
                            continue;
                        }
                    }
                    None => {
                        self.emit(StatechartEvent::Warning {
                            machine: self.machine_id.clone(),
                            error: StatechartError::GuardMissing(guard.clone()),
                        });
                        continue;
                    }
                }
            }
            if let Some(in_state) = &t.in_state {
                if !self.config.iter().any(|s| Chart::is_descendant(s, in_state)) {
                    continue;
                }
            }
            return Some(t.clone());
        }
        None
    }

    /// A matched transition whose scope is `scope`, landing on a single
    /// `target` (§4.4.3). Handles the "escaping" parallel-region case by
    /// rescoping the exit boundary to the enclosing parallel state.
    fn perform_transition(
        &mut self,
        scope: &str,
        target: &str,
        depth: &mut u32,
    ) -> Result<(), StatechartError> {
        let exit_scope = region::rescope_for_target(&self.chart, scope, target);
        let target = self.resolve_history_target(target);
        let lca = self.least_common_ancestor(&exit_scope, &target);

        let exiting: Vec<StateId> = region::active_descendants(&self.config, &exit_scope)
            .into_iter()
            .map(String::from)
            .collect();
        for leaf in &exiting {
            self.exit_chain(leaf, &lca)?;
        }
        self.config.retain(|s| !exiting.contains(s));

        let entry_states = self.entry_path(&lca, &target);
        let leaves: Vec<StateId> = entry_states
            .iter()
            .filter(|s| self.chart.state(s).map(|n| n.is_leaf()).unwrap_or(true))
            .cloned()
            .collect();
        self.config.extend(leaves);
        self.config.sort();
        self.config.dedup();

        self.enter_and_settle(entry_states, depth)
    }

    /// Direct region transition (§4.4.2 item 3): replaces only the one
    /// region's current leaf, leaving sibling regions untouched.
    fn perform_region_transition(
        &mut self,
        parallel: &str,
        target: &str,
        depth: &mut u32,
    ) -> Result<(), StatechartError> {
        let region_child = match self
            .chart
            .state(parallel)
            .and_then(|n| n.children.iter().find(|c| Chart::is_descendant(target, c)))
        {
            Some(c) => c.clone(),
            None => return Ok(()),
        };
        self.perform_transition(&region_child, target, depth)
    }

    /// Exits `leaf`'s ancestor chain deepest-to-shallowest, stopping before
    /// `stop_before` (the transition's least common ancestor). Saves history
    /// for any exited parent that owns a history child. Aborts at the last
    /// committed state if an exit action panics, leaving the remainder of
    /// the chain (and its history) uncommitted.
    fn exit_chain(&mut self, leaf: &str, stop_before: &str) -> Result<(), StatechartError> {
        let chain: Vec<StateId> = self
            .chart
            .ancestors(leaf)
            .into_iter()
            .take_while(|a| *a != stop_before)
            .map(String::from)
            .collect();

        for (i, state) in chain.iter().enumerate() {
            self.cancel_timers(state);
            self.cancel_invoke(state);
            let exit_actions = self.chart.state(state).map(|n| n.exit.clone());
            if let Some(actions) = exit_actions {
                self.run_actions(&actions, &Value::Null)?;
            }
            self.emit(StatechartEvent::StateExited {
                machine: self.machine_id.clone(),
                state: state.clone(),
            });

            let parent = self.chart.state(state).and_then(|n| n.parent.clone());
            if let Some(parent) = parent {
                let history_kind = self.chart.state(&parent).and_then(|p| {
                    p.children.iter().find_map(|c| {
                        self.chart.state(c).and_then(|cn| match cn.kind {
                            StateKind::History(kind) => Some(kind),
                            _ => None,
                        })
                    })
                });
                // `state` (chain[i]) is the direct child of `parent` here —
                // shallow history restores just that child; deep restores
                // the whole leaf-to-child path, shallowest first.
                if let Some(kind) = history_kind {
                    let saved: Vec<StateId> = match kind {
                        HistoryKind::Shallow => vec![state.clone()],
                        HistoryKind::Deep => {
                            let mut path = chain[..=i].to_vec();
                            path.reverse();
                            path
                        }
                    };
                    self.history.insert(parent, saved);
                }
            }
        }
        Ok(())
    }

    fn cancel_timers(&mut self, state: &str) {
        let keys: Vec<(StateId, u64)> = self
            .timers
            .keys()
            .filter(|(s, _)| s == state)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = self.timers.remove(&key) {
                handle.cancel();
            }
            self.emit(StatechartEvent::TimerCancelled {
                machine: self.machine_id.clone(),
                state: state.to_string(),
            });
        }
    }

    fn cancel_invoke(&mut self, state: &str) {
        if let Some(cancel) = self.invokes.remove(state) {
            cancel.cancel();
        }
    }

    fn resolve_history_target(&self, target: &str) -> StateId {
        let node = match self.chart.state(target) {
            Some(n) => n,
            None => return target.to_string(),
        };
        if !matches!(node.kind, StateKind::History(_)) {
            return target.to_string();
        }
        let parent = node.parent.clone().unwrap_or_default();
        if let Some(saved) = self.history.get(&parent) {
            if let Some(leaf) = saved.last() {
                return leaf.clone();
            }
        }
        if let Some(default) = &node.history_default {
            return default.clone();
        }
        self.chart
            .state(&parent)
            .and_then(|p| p.initial.clone())
            .unwrap_or(parent)
    }

    /// `a`'s *proper* ancestors (excluding `a` itself) against `b`'s
    /// ancestors (including `b`): an external self-transition (`a == b`, or
    /// `b` nested under `a`) must still force `a` out of the exit/entry
    /// boundary rather than being its own domain.
    fn least_common_ancestor(&self, a: &str, b: &str) -> StateId {
        let a_ancestors: Vec<&str> = self.chart.ancestors(a).into_iter().skip(1).collect();
        let b_ancestors: std::collections::HashSet<&str> =
            self.chart.ancestors(b).into_iter().collect();
        for anc in a_ancestors {
            if b_ancestors.contains(anc) {
                return anc.to_string();
            }
        }
        crate::model::ROOT.to_string()
    }

    /// States from just below `lca` down to `target`, inclusive, followed by
    /// `target`'s structural expansion (initial children / all regions) down
    /// to leaves — all in top-down order.
    fn entry_path(&self, lca: &str, target: &str) -> Vec<StateId> {
        let mut chain: Vec<StateId> = self
            .chart
            .ancestors(target)
            .into_iter()
            .take_while(|a| *a != lca)
            .map(String::from)
            .collect();
        chain.reverse();
        expand_collect(&self.chart, target, &mut chain);
        chain
    }

    fn enter_and_settle(
        &mut self,
        entry_states: Vec<StateId>,
        depth: &mut u32,
    ) -> Result<(), StatechartError> {
        for state in &entry_states {
            if let Some(node) = self.chart.state(state).cloned() {
                self.run_actions(&node.entry, &Value::Null)?;
            }
            self.emit(StatechartEvent::StateEntered {
                machine: self.machine_id.clone(),
                state: state.clone(),
            });
            self.schedule_timers(state);
            self.start_invoke(state);
            self.check_final(state)?;
        }

        for state in &entry_states {
            if *depth == 0 {
                self.emit(StatechartEvent::Warning {
                    machine: self.machine_id.clone(),
                    error: StatechartError::AlwaysLoopLimit {
                        machine: self.machine_id.clone(),
                        limit: self.always_cap,
                    },
                });
                return Ok(());
            }
            let node = match self.chart.state(state) {
                Some(n) => n.clone(),
                None => continue,
            };
            if node.always.is_empty() {
                continue;
            }
            if let Some(t) = self.select_transition(&node.always, &Value::Null) {
                *depth -= 1;
                self.run_actions(&t.actions, &Value::Null)?;
                if !t.internal && !t.targets.is_empty() {
                    self.perform_transition(state, &t.targets[0], depth)?;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    fn schedule_timers(&mut self, state: &str) {
        let entries: Vec<u64> = match self.chart.state(state) {
            Some(n) => n.after.keys().cloned().collect(),
            None => return,
        };
        for delay_ms in entries {
            let tx = self.self_tx.clone();
            let state_id = state.to_string();
            let handle = timer::spawn(delay_ms, move || {
                let state_id = state_id.clone();
                async move {
                    let _ = tx
                        .send(Internal::TimerFired {
                            state: state_id,
                            delay_ms,
                        })
                        .await;
                }
            });
            self.timers.insert((state.to_string(), delay_ms), handle);
            self.emit(StatechartEvent::TimerScheduled {
                machine: self.machine_id.clone(),
                state: state.to_string(),
                delay_ms,
            });
        }
    }

    fn start_invoke(&mut self, state: &str) {
        let invoke = match self.chart.state(state).and_then(|n| n.invoke.clone()) {
            Some(i) => i,
            None => return,
        };
        let service = match self.context.service(&invoke.service) {
            Some(s) => s,
            None => {
                self.emit(StatechartEvent::Warning {
                    machine: self.machine_id.clone(),
                    error: StatechartError::ActionMissing(invoke.service.clone()),
                });
                return;
            }
        };
        let cancel = CancelToken::new();
        self.invokes.insert(state.to_string(), cancel.clone());
        self.emit(StatechartEvent::ServiceStarted {
            machine: self.machine_id.clone(),
            state: state.to_string(),
            service: invoke.service.clone(),
        });
        let tx = self.self_tx.clone();
        let state_id = state.to_string();
        let ctx = crate::context::ServiceCtx {
            machine: self.machine_id.clone(),
            state: state.to_string(),
            values: self.context.values.clone(),
            cancel,
        };
        tokio::spawn(async move {
            let result = service.run(ctx).await;
            let _ = tx
                .send(Internal::ServiceDone {
                    state: state_id,
                    result,
                })
                .await;
        });
    }

    /// Nearest enclosing `Parallel` ancestor of `state`, if any (§4.4.4).
    fn enclosing_parallel(&self, state: &str) -> Option<StateId> {
        self.chart
            .ancestors(state)
            .into_iter()
            .skip(1)
            .find(|anc| {
                self.chart
                    .state(anc)
                    .map(|n| n.kind == StateKind::Parallel)
                    .unwrap_or(false)
            })
            .map(String::from)
    }

    /// §4.4.4: once every region of `parallel` has independently reached a
    /// final leaf, run its `on_done` transition, or else emit a synthetic
    /// completion notification.
    fn check_parallel_done(&mut self, parallel: &str) -> Result<(), StatechartError> {
        let regions = match self.chart.state(parallel) {
            Some(n) => n.children.clone(),
            None => return Ok(()),
        };
        let all_done = regions.iter().all(|region| {
            self.config.iter().any(|leaf| {
                Chart::is_descendant(leaf, region)
                    && self
                        .chart
                        .state(leaf)
                        .map(|n| n.kind == StateKind::Final)
                        .unwrap_or(false)
            })
        });
        if !all_done {
            return Ok(());
        }
        let on_done = self.chart.state(parallel).and_then(|n| n.on_done.clone());
        match on_done {
            Some(t) => self.apply_transition(parallel, false, &t, &Value::Null),
            None => {
                self.emit(StatechartEvent::Completed {
                    machine: self.machine_id.clone(),
                    output: None,
                });
                Ok(())
            }
        }
    }

    fn check_final(&mut self, state: &str) -> Result<(), StatechartError> {
        let node = match self.chart.state(state) {
            Some(n) => n,
            None => return Ok(()),
        };
        if node.kind != StateKind::Final {
            return Ok(());
        }
        if let Some(parallel) = self.enclosing_parallel(state) {
            return self.check_parallel_done(&parallel);
        }
        let parent = match &node.parent {
            Some(p) => p.clone(),
            None => {
                self.output = node.final_output.clone();
                self.emit(StatechartEvent::Completed {
                    machine: self.machine_id.clone(),
                    output: self.output.clone(),
                });
                return Ok(());
            }
        };
        let siblings_done = self
            .chart
            .state(&parent)
            .map(|p| {
                p.children.iter().all(|c| {
                    self.chart
                        .state(c)
                        .map(|cn| {
                            cn.kind == StateKind::Final
                                && self.config.iter().any(|leaf| leaf == c)
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        if !siblings_done {
            return Ok(());
        }
        let on_done = self.chart.state(&parent).and_then(|n| n.on_done.clone());
        if let Some(t) = on_done {
            self.apply_transition(&parent, false, &t, &Value::Null)?;
        }
        Ok(())
    }

    /// Runs `actions` in order, aborting and surfacing `ActionFailed` if a
    /// registered action closure panics — the step stops at the last
    /// committed point rather than letting the panic unwind into the
    /// orchestrator's worker task (§4.3/§7).
    fn run_actions(&mut self, actions: &[ActionRef], payload: &Value) -> Result<(), StatechartError> {
        for action in actions {
            match action {
                ActionRef::Named(name) => match self.context.action(name) {
                    Some(f) => {
                        let mut ctx = ActionCtx::new(
                            &self.machine_id,
                            &mut self.context.values,
                            &mut self.pending_sends,
                        );
                        let outcome =
                            panic::catch_unwind(AssertUnwindSafe(|| f(&mut ctx, payload)));
                        if let Err(payload) = outcome {
                            let error = StatechartError::ActionFailed {
                                action: name.clone(),
                                message: panic_message(payload),
                            };
                            self.emit(StatechartEvent::Warning {
                                machine: self.machine_id.clone(),
                                error: error.clone(),
                            });
                            return Err(error);
                        }
                    }
                    None => {
                        self.emit(StatechartEvent::Warning {
                            machine: self.machine_id.clone(),
                            error: StatechartError::ActionMissing(name.clone()),
                        });
                    }
                },
                ActionRef::Assign(values) => {
                    for (k, v) in values {
                        self.context.values.insert(k.clone(), v.clone());
                    }
                }
                ActionRef::Raise { event, payload: p } => {
                    let data = p.clone().unwrap_or(Value::Null);
                    let result = self.step(event.clone(), data);
                    if let Some(error) = result.error {
                        return Err(error);
                    }
                }
                ActionRef::Send {
                    target,
                    event,
                    payload: p,
                } => {
                    self.pending_sends.push(PendingSend {
                        target: target.clone(),
                        event: event.clone(),
                        payload: p.clone().unwrap_or(Value::Null),
                    });
                }
            }
        }
        Ok(())
    }

    fn emit(&self, event: StatechartEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }
}

fn expand_collect(chart: &Chart, id: &str, out: &mut Vec<StateId>) {
    let node = match chart.state(id) {
        Some(n) => n,
        None => return,
    };
    match &node.kind {
        StateKind::Atomic | StateKind::Final | StateKind::History(_) => {}
        StateKind::Compound => {
            if let Some(child) = node.initial.clone() {
                out.push(child.clone());
                expand_collect(chart, &child, out);
            }
        }
        StateKind::Parallel => {
            for child in node.children.clone() {
                out.push(child.clone());
                expand_collect(chart, &child, out);
            }
        }
    }
}
