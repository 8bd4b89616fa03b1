//! C8 — optimized array-indexed variant (§4.4.9). A hot-path
//! specialization of the general interpreter (`crate::interpreter`) for
//! charts that only use atomic/compound states: states and events are
//! interned to small integers and transitions live in a dense
//! `[state][event]` table, trading the general interpreter's flexibility
//! (parallel regions, history, `invoke`, `after`) for a lookup with no
//! string hashing on the step path. Gated behind the `optimized-index`
//! feature since most charts don't need it.

use crate::context::{ActionCtx, Context, PendingSend, SnapshotView};
use crate::error::{panic_message, DefinitionError, StatechartError};
use crate::events::{EventResult, Listener, Snapshot, StatechartEvent};
use crate::model::{Chart, EventName, MachineId, StateId, StateKind, Transition, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateIdx(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventIdx(u32);

/// Precomputed, array-indexed form of a `Chart` restricted to
/// atomic/compound states (§4.4.9).
pub struct IndexedChart {
    names: Vec<StateId>,
    index_of: HashMap<StateId, StateIdx>,
    parent: Vec<Option<StateIdx>>,
    initial: Vec<Option<StateIdx>>,
    entry: Vec<Vec<crate::model::ActionRef>>,
    exit: Vec<Vec<crate::model::ActionRef>>,
    always: Vec<Vec<Transition>>,
    event_index: HashMap<EventName, EventIdx>,
    /// `on[state.0 as usize][event.0 as usize]` — empty when the state has
    /// no handler for that event.
    on: Vec<Vec<Vec<Transition>>>,
}

fn unsupported(state: &StateId, feature: &'static str) -> DefinitionError {
    DefinitionError::UnsupportedByIndex {
        state: state.clone(),
        feature,
    }
}

impl IndexedChart {
    /// Compiles `chart` into its indexed form, rejecting any state that
    /// uses a feature this variant doesn't support — parallel regions,
    /// history, `invoke`, or `after` timers.
    pub fn build(chart: &Chart) -> Result<Self, DefinitionError> {
        for node in chart.states.values() {
            match node.kind {
                StateKind::Parallel => return Err(unsupported(&node.id, "parallel")),
                StateKind::History(_) => return Err(unsupported(&node.id, "history")),
                _ => {}
            }
            if node.invoke.is_some() {
                return Err(unsupported(&node.id, "invoke"));
            }
            if !node.after.is_empty() {
                return Err(unsupported(&node.id, "after"));
            }
        }

        let names: Vec<StateId> = chart.states.keys().cloned().collect();
        let index_of: HashMap<StateId, StateIdx> = names
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), StateIdx(i as u32)))
            .collect();

        let mut event_names: std::collections::BTreeSet<EventName> = Default::default();
        for node in chart.states.values() {
            event_names.extend(node.on.keys().cloned());
        }
        let event_index: HashMap<EventName, EventIdx> = event_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, EventIdx(i as u32)))
            .collect();

        let mut parent = Vec::with_capacity(names.len());
        let mut initial = Vec::with_capacity(names.len());
        let mut entry = Vec::with_capacity(names.len());
        let mut exit = Vec::with_capacity(names.len());
        let mut always = Vec::with_capacity(names.len());
        let mut on: Vec<Vec<Vec<Transition>>> = Vec::with_capacity(names.len());

        for id in &names {
            let node = &chart.states[id];
            parent.push(node.parent.as_ref().map(|p| index_of[p]));
            initial.push(node.initial.as_ref().map(|i| index_of[i]));
            entry.push(node.entry.clone());
            exit.push(node.exit.clone());
            always.push(node.always.clone());

            let mut row = vec![Vec::new(); event_index.len()];
            for (event, transitions) in &node.on {
                row[event_index[event].0 as usize] = transitions.clone();
            }
            on.push(row);
        }

        Ok(Self {
            names,
            index_of,
            parent,
            initial,
            entry,
            exit,
            always,
            event_index,
            on,
        })
    }

    fn root(&self) -> StateIdx {
        StateIdx(self.index_of[crate::model::ROOT].0)
    }

    fn name(&self, idx: StateIdx) -> &str {
        &self.names[idx.0 as usize]
    }

    /// Walks `initial` children down to a leaf.
    fn expand_to_leaf(&self, mut idx: StateIdx) -> StateIdx {
        while let Some(child) = self.initial[idx.0 as usize] {
            idx = child;
        }
        idx
    }

    /// `idx` and every ancestor up to and including the root, deepest first.
    fn ancestors(&self, idx: StateIdx) -> Vec<StateIdx> {
        let mut out = vec![idx];
        let mut cur = idx;
        while let Some(p) = self.parent[cur.0 as usize] {
            out.push(p);
            cur = p;
        }
        out
    }

    /// See the core interpreter's `least_common_ancestor`: `a` contributes
    /// only its proper ancestors so a self-transition still forces `a`
    /// through exit/entry instead of being its own domain.
    fn least_common_ancestor(&self, a: StateIdx, b: StateIdx) -> StateIdx {
        let a_chain: Vec<StateIdx> = self.ancestors(a).into_iter().skip(1).collect();
        let b_chain: std::collections::HashSet<StateIdx> = self.ancestors(b).into_iter().collect();
        for candidate in a_chain {
            if b_chain.contains(&candidate) {
                return candidate;
            }
        }
        self.root()
    }
}

/// Driver for an `IndexedChart`. Holds a single active leaf — no parallel
/// regions means no multi-leaf configuration to track.
pub struct IndexedInterpreter {
    machine_id: MachineId,
    chart: Arc<IndexedChart>,
    context: Context,
    current: StateIdx,
    running: bool,
    output: Option<Value>,
    listeners: Vec<Listener>,
    pending_sends: Vec<PendingSend>,
    always_cap: u32,
}

impl IndexedInterpreter {
    pub fn new(machine_id: MachineId, chart: Arc<IndexedChart>, context: Context) -> Self {
        let current = chart.root();
        Self {
            machine_id,
            chart,
            context,
            current,
            running: false,
            output: None,
            listeners: Vec::new(),
            pending_sends: Vec::new(),
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

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_state(&self) -> String {
        self.chart.name(self.current).to_string()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.current_state(),
            context: self.context.values.clone(),
            running: self.running,
            meta: Vec::new(),
            tags: Vec::new(),
            output: self.output.clone(),
            description: None,
        }
    }

    pub fn take_pending_sends(&mut self) -> Vec<PendingSend> {
        std::mem::take(&mut self.pending_sends)
    }

    pub fn start(&mut self) -> StateId {
        if self.running {
            return self.current_state();
        }
        self.running = true;
        let leaf = self.chart.expand_to_leaf(self.chart.root());
        let path = self.entry_path(self.chart.root(), leaf);
        let mut depth = self.always_cap;
        if let Err(error) = self.enter_and_settle(&path, &mut depth) {
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
        let chain: Vec<StateIdx> = self
            .chart
            .ancestors(self.current)
            .into_iter()
            .take_while(|s| *s != self.chart.root())
            .collect();
        if let Err(error) = self.exit_chain(&chain) {
            self.emit(StatechartEvent::Warning {
                machine: self.machine_id.clone(),
                error,
            });
        }
        self.running = false;
        self.emit(StatechartEvent::Stopped {
            machine: self.machine_id.clone(),
        });
    }

    pub fn step(&mut self, event: EventName, payload: Value) -> EventResult {
        if !self.running {
            return EventResult::err(
                self.current_state(),
                StatechartError::NotStarted(self.machine_id.clone()),
            );
        }

        let Some(&event_idx) = self.chart.event_index.get(&event) else {
            return EventResult::ok(self.current_state());
        };

        let scope = self
            .chart
            .ancestors(self.current)
            .into_iter()
            .find(|s| !self.chart.on[s.0 as usize][event_idx.0 as usize].is_empty());

        let Some(scope) = scope else {
            return EventResult::ok(self.current_state());
        };

        let transitions = self.chart.on[scope.0 as usize][event_idx.0 as usize].clone();
        let Some(t) = self.select_transition(&transitions, &payload) else {
            return EventResult::ok(self.current_state());
        };

        self.emit(StatechartEvent::Transitioned {
            machine: self.machine_id.clone(),
            event: event.clone(),
            from: vec![self.current_state()],
            to: t.targets.clone(),
        });

        if let Err(error) = self.run_actions(&t.actions, &payload) {
            return EventResult::err(self.current_state(), error);
        }
        if !t.internal && !t.targets.is_empty() {
            if let Some(&target) = self.chart.index_of.get(&t.targets[0]) {
                let mut depth = self.always_cap;
                if let Err(error) = self.perform_transition(scope, target, &mut depth) {
                    return EventResult::err(self.current_state(), error);
                }
            }
        }

        EventResult::ok(self.current_state())
    }

    fn select_transition(&self, transitions: &[Transition], payload: &Value) -> Option<Transition> {
        let rendered = self.current_state();
        let config = [rendered.clone()];
        for t in transitions {
            if let Some(guard) = &t.guard {
                let view = SnapshotView {
                    state: &rendered,
                    config: &config,
                    values: &self.context.values,
                };
                let passes = match self.context.guard(guard) {
                    Some(g) => g(&view, payload),
                    None => {
                        self.emit(StatechartEvent::Warning {
                            machine: self.machine_id.clone(),
                            error: StatechartError::GuardMissing(guard.clone()),
                        });
                        false
                    }
                };
                if !passes {
                    continue;
                }
            }
            if let Some(in_state) = &t.in_state {
                if !Chart::is_descendant(&rendered, in_state) {
                    continue;
                }
            }
            return Some(t.clone());
        }
        None
    }

    fn entry_path(&self, lca: StateIdx, target: StateIdx) -> Vec<StateIdx> {
        let mut chain: Vec<StateIdx> = self
            .chart
            .ancestors(target)
            .into_iter()
            .take_while(|s| *s != lca)
            .collect();
        chain.reverse();
        chain
    }

    fn exit_chain(&mut self, chain: &[StateIdx]) -> Result<(), StatechartError> {
        for &idx in chain {
            let actions = self.chart.exit[idx.0 as usize].clone();
            self.run_actions(&actions, &Value::Null)?;
            self.emit(StatechartEvent::StateExited {
                machine: self.machine_id.clone(),
                state: self.chart.name(idx).to_string(),
            });
        }
        Ok(())
    }

    fn perform_transition(
        &mut self,
        scope: StateIdx,
        target: StateIdx,
        depth: &mut u32,
    ) -> Result<(), StatechartError> {
        let lca = self.chart.least_common_ancestor(scope, target);
        let exit_set: Vec<StateIdx> = self
            .chart
            .ancestors(self.current)
            .into_iter()
            .take_while(|s| *s != lca)
            .collect();
        self.exit_chain(&exit_set)?;

        let leaf = self.chart.expand_to_leaf(target);
        let entry_set = self.entry_path(lca, leaf);
        self.enter_and_settle(&entry_set, depth)
    }

    fn enter_and_settle(
        &mut self,
        entry_states: &[StateIdx],
        depth: &mut u32,
    ) -> Result<(), StatechartError> {
        for &idx in entry_states {
            let actions = self.chart.entry[idx.0 as usize].clone();
            self.run_actions(&actions, &Value::Null)?;
            self.current = idx;
            self.emit(StatechartEvent::StateEntered {
                machine: self.machine_id.clone(),
                state: self.chart.name(idx).to_string(),
            });
        }

        for &idx in entry_states {
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
            let always = self.chart.always[idx.0 as usize].clone();
            if always.is_empty() {
                continue;
            }
            if let Some(t) = self.select_transition(&always, &Value::Null) {
                *depth -= 1;
                self.run_actions(&t.actions, &Value::Null)?;
                if !t.internal && !t.targets.is_empty() {
                    if let Some(&target) = self.chart.index_of.get(&t.targets[0]) {
                        self.perform_transition(idx, target, depth)?;
                    }
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// See the core interpreter's `run_actions`: catches a panicking action
    /// closure and surfaces `ActionFailed` rather than unwinding the
    /// orchestrator's worker task.
    fn run_actions(
        &mut self,
        actions: &[crate::model::ActionRef],
        payload: &Value,
    ) -> Result<(), StatechartError> {
        for action in actions {
            match action {
                crate::model::ActionRef::Named(name) => match self.context.action(name) {
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
                    None => self.emit(StatechartEvent::Warning {
                        machine: self.machine_id.clone(),
                        error: StatechartError::ActionMissing(name.clone()),
                    }),
                },
                crate::model::ActionRef::Assign(values) => {
                    for (k, v) in values {
                        self.context.values.insert(k.clone(), v.clone());
                    }
                }
                crate::model::ActionRef::Raise { .. } => {
                    // Self-raised events aren't supported by this variant;
                    // only `request_send`-style cross-instance dispatch is.
                }
                crate::model::ActionRef::Send {
                    target,
                    event,
                    payload: send_payload,
                } => {
                    self.pending_sends.push(PendingSend {
                        target: target.clone(),
                        event: event.clone(),
                        payload: send_payload.clone().unwrap_or(Value::Null),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn indexed(src: &str) -> IndexedInterpreter {
        let chart = parse(src).unwrap();
        let indexed = Arc::new(IndexedChart::build(&chart).unwrap());
        IndexedInterpreter::new("m".into(), indexed, Context::new())
    }

    #[test]
    fn linear_transition() {
        let mut interp = indexed(
            r#"{
                "id": "light",
                "initial": "red",
                "states": {
                    "red": { "on": { "NEXT": "green" } },
                    "green": { "on": { "NEXT": "red" } }
                }
            }"#,
        );
        assert_eq!(interp.start(), "red");
        let result = interp.step("NEXT".into(), Value::Null);
        assert!(result.success);
        assert_eq!(result.new_state, "green");
    }

    #[test]
    fn guard_first_match_wins() {
        let mut context = Context::new();
        context.register_guard("never", |_, _| false);
        context.register_guard("always_true", |_, _| true);
        let chart = parse(
            r#"{
                "id": "g",
                "initial": "a",
                "states": {
                    "a": { "on": { "go": [
                        { "target": "b", "cond": "never" },
                        { "target": "c", "cond": "always_true" }
                    ] } },
                    "b": {},
                    "c": {}
                }
            }"#,
        )
        .unwrap();
        let indexed = Arc::new(IndexedChart::build(&chart).unwrap());
        let mut interp = IndexedInterpreter::new("g".into(), indexed, context);
        interp.start();
        let result = interp.step("go".into(), Value::Null);
        assert_eq!(result.new_state, "c");
    }

    #[test]
    fn always_chain_cascades_on_entry() {
        let mut interp = indexed(
            r#"{
                "id": "cascade",
                "initial": "a",
                "states": {
                    "a": { "always": "b" },
                    "b": { "always": "c" },
                    "c": {}
                }
            }"#,
        );
        assert_eq!(interp.start(), "c");
    }

    #[test]
    fn parallel_chart_rejected() {
        let chart = parse(
            r#"{
                "id": "p",
                "type": "parallel",
                "states": {
                    "r1": { "initial": "x", "states": { "x": {} } },
                    "r2": { "initial": "y", "states": { "y": {} } }
                }
            }"#,
        )
        .unwrap();
        let err = IndexedChart::build(&chart);
        assert!(matches!(
            err,
            Err(DefinitionError::UnsupportedByIndex { feature: "parallel", .. })
        ));
    }
}
