//! C1 — the immutable, resolved definition model (`Chart`) produced by the
//! parser (`crate::parser`) and consumed by the interpreter (`crate::interpreter`).

use serde_json::Map;
use std::collections::BTreeMap;

/// Opaque, process-unique identifier of a registered interpreter instance.
pub type MachineId = String;

/// Dotted path from the chart root, e.g. `"parent.child.grandchild"`. The
/// root itself is the empty string.
pub type StateId = String;

pub type EventName = String;
pub type GuardName = String;
pub type ActionName = String;
pub type ServiceName = String;

/// Payload carried by events, action results, and context values. Never
/// interpreted by the core — collaborators own its shape.
pub type Value = serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    Shallow,
    Deep,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryKind),
}

/// Either a registered name resolved through the interpreter's `Context` at
/// run time, or a literal inline action the core executes itself.
#[derive(Clone, Debug)]
pub enum ActionRef {
    Named(ActionName),
    Assign(BTreeMap<String, Value>),
    Raise {
        event: EventName,
        payload: Option<Value>,
    },
    Send {
        target: MachineId,
        event: EventName,
        payload: Option<Value>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Transition {
    /// Resolved absolute `StateId`s. Empty for an internal/no-op transition.
    pub targets: Vec<StateId>,
    pub guard: Option<GuardName>,
    /// Resolved absolute `StateId` the instance must currently occupy.
    pub in_state: Option<StateId>,
    pub actions: Vec<ActionRef>,
    pub internal: bool,
}

impl Transition {
    /// Sugar for the common single-target case (see §9 "mixed representation").
    pub fn target(&self) -> Option<&StateId> {
        self.targets.first()
    }
}

#[derive(Clone, Debug)]
pub struct Invoke {
    pub service: ServiceName,
    pub id: Option<String>,
    pub on_done: Option<Transition>,
    pub on_error: Option<Transition>,
}

#[derive(Clone, Debug)]
pub struct StateNode {
    pub id: StateId,
    pub parent: Option<StateId>,
    /// Absolute ids of direct children, in declaration order.
    pub children: Vec<StateId>,
    pub kind: StateKind,
    /// Absolute id of the default child, set whenever `kind` is `Compound`
    /// (or `Parallel`, where it is unused) and there is one.
    pub initial: Option<StateId>,
    pub on: BTreeMap<EventName, Vec<Transition>>,
    pub entry: Vec<ActionRef>,
    pub exit: Vec<ActionRef>,
    pub after: BTreeMap<u64, Vec<Transition>>,
    pub always: Vec<Transition>,
    pub invoke: Option<Invoke>,
    pub history: Option<HistoryKind>,
    /// Default target for a history node when no prior visit was recorded.
    pub history_default: Option<StateId>,
    /// Transition taken when a compound/parallel state's children all complete.
    pub on_done: Option<Transition>,
    pub final_output: Option<Value>,
    pub meta: Option<Value>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl StateNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }
}

/// A complete, immutable state-chart definition. The root is always stored
/// under the empty-string key.
#[derive(Clone, Debug)]
pub struct Chart {
    pub id: MachineId,
    pub states: BTreeMap<StateId, StateNode>,
}

pub const ROOT: &str = "";

impl Chart {
    pub fn root(&self) -> &StateNode {
        &self.states[ROOT]
    }

    pub fn state(&self, id: &str) -> Option<&StateNode> {
        self.states.get(id)
    }

    /// Absolute id of the parent path of `id` (empty string if `id` is a
    /// root-level child).
    pub fn parent_path(id: &str) -> &str {
        match id.rfind('.') {
            Some(idx) => &id[..idx],
            None => ROOT,
        }
    }

    /// Join an ancestor path with a child name into an absolute id.
    pub fn join(parent: &str, name: &str) -> StateId {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}.{name}")
        }
    }

    /// All ancestors of `id`, from `id` itself up to and including the root.
    pub fn ancestors<'a>(&self, id: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut cur = id;
        loop {
            out.push(cur);
            if cur.is_empty() {
                break;
            }
            cur = Self::parent_path(cur);
        }
        out
    }

    /// True if `descendant` is `ancestor` or nested under it.
    pub fn is_descendant(descendant: &str, ancestor: &str) -> bool {
        if ancestor.is_empty() {
            return true;
        }
        descendant == ancestor || descendant.starts_with(&format!("{ancestor}."))
    }

    /// Walk down from `from` following `initial` children (and, for
    /// parallel states, all regions) until every active path reaches a leaf.
    pub fn expand_to_leaves(&self, from: &str) -> Vec<StateId> {
        let node = match self.state(from) {
            Some(n) => n,
            None => return vec![from.to_string()],
        };
        match node.kind {
            StateKind::Atomic | StateKind::Final => vec![from.to_string()],
            StateKind::History(_) => vec![from.to_string()],
            StateKind::Parallel => node
                .children
                .iter()
                .flat_map(|c| self.expand_to_leaves(c))
                .collect(),
            StateKind::Compound => match &node.initial {
                Some(child) => self.expand_to_leaves(child),
                None => vec![from.to_string()],
            },
        }
    }
}

pub type ContextValues = Map<String, Value>;
