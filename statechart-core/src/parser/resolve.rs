//! DTO → `Chart`: two-pass resolution mirroring the teacher's
//! `lowering`/`verifier` split (`compiler/lowering.rs`, `compiler/verifier.rs`)
//! — pass 1 builds the structural tree and defers every transition target;
//! pass 2 resolves targets now that the full set of state ids is known,
//! applying the ordered rules of §4.1.

use super::dto::{RawActionRef, RawChart, RawState, RawTargets, RawTransition};
use crate::error::DefinitionError;
use crate::model::{ActionRef, Chart, HistoryKind, Invoke, StateId, StateKind, StateNode};
use std::collections::{BTreeMap, BTreeSet};

enum PendingField {
    On(String),
    After(u64),
    Always,
    OnDone,
    InvokeOnDone,
    InvokeOnError,
    HistoryDefault,
}

struct Pending {
    owner: StateId,
    field: PendingField,
    raw: Vec<RawTransition>,
}

pub fn resolve(raw: RawChart) -> Result<Chart, DefinitionError> {
    let mut states = BTreeMap::new();
    let mut pending = Vec::new();
    let root_children: BTreeSet<String> = raw.root.states.keys().cloned().collect();

    build_state(String::new(), None, raw.root, &mut states, &mut pending)?;
    apply_pending(pending, &mut states, &root_children)?;

    Ok(Chart { id: raw.id, states })
}

fn build_state(
    id: StateId,
    parent: Option<StateId>,
    mut raw: RawState,
    states: &mut BTreeMap<StateId, StateNode>,
    pending: &mut Vec<Pending>,
) -> Result<(), DefinitionError> {
    if states.contains_key(&id) {
        return Err(DefinitionError::DuplicateState(id));
    }

    let kind_str = raw.kind.take();
    let initial_name = raw.initial.take();
    let history_str = raw.history.take();
    let target_str = raw.target.take();
    let child_raws: Vec<(String, RawState)> = std::mem::take(&mut raw.states).into_iter().collect();
    let on_raw = std::mem::take(&mut raw.on);
    let after_raw = std::mem::take(&mut raw.after);
    let always_raw = std::mem::take(&mut raw.always);
    let invoke_raw = raw.invoke.take();
    let on_done_raw = raw.on_done.take();
    let entry_raw = std::mem::take(&mut raw.entry);
    let exit_raw = std::mem::take(&mut raw.exit);

    let has_children = !child_raws.is_empty();

    let history = match kind_str.as_deref() {
        Some("history") => Some(match history_str.as_deref() {
            Some("deep") => HistoryKind::Deep,
            _ => HistoryKind::Shallow,
        }),
        _ => None,
    };

    let kind = match kind_str.as_deref() {
        Some("parallel") => StateKind::Parallel,
        Some("final") => StateKind::Final,
        Some("history") => StateKind::History(history.unwrap()),
        Some("atomic") => StateKind::Atomic,
        Some("compound") => StateKind::Compound,
        None if has_children => StateKind::Compound,
        None => StateKind::Atomic,
        Some(other) => {
            return Err(DefinitionError::Parse(format!("unknown state type {other:?}")))
        }
    };

    if matches!(kind, StateKind::History(_)) && parent.is_none() {
        return Err(DefinitionError::MisplacedHistory(id));
    }

    let mut children_ids = Vec::with_capacity(child_raws.len());
    for (name, _) in &child_raws {
        children_ids.push(Chart::join(&id, name));
    }

    for (name, child_raw) in child_raws {
        let child_id = Chart::join(&id, &name);
        build_state(child_id, Some(id.clone()), child_raw, states, pending)?;
    }

    let initial = match kind {
        StateKind::Compound => match initial_name {
            Some(name) => {
                let cand = Chart::join(&id, &name);
                if !children_ids.contains(&cand) {
                    return Err(DefinitionError::InvalidReference {
                        kind: "initial",
                        name,
                        from: id.clone(),
                    });
                }
                Some(cand)
            }
            None => {
                // Allowed without an explicit `initial` only when every
                // child is a final state (§4.1 "Rejects" rule): the chart
                // author's declared order then picks the entry child.
                let all_final = !children_ids.is_empty()
                    && children_ids
                        .iter()
                        .all(|c| matches!(states[c].kind, StateKind::Final));
                if all_final {
                    Some(children_ids[0].clone())
                } else {
                    return Err(DefinitionError::MissingInitial(id));
                }
            }
        },
        _ => None,
    };

    let invoke = match invoke_raw {
        Some(i) => {
            if let Some(t) = i.on_done {
                pending.push(Pending {
                    owner: id.clone(),
                    field: PendingField::InvokeOnDone,
                    raw: vec![t],
                });
            }
            if let Some(t) = i.on_error {
                pending.push(Pending {
                    owner: id.clone(),
                    field: PendingField::InvokeOnError,
                    raw: vec![t],
                });
            }
            Some(Invoke {
                service: i.src,
                id: i.id,
                on_done: None,
                on_error: None,
            })
        }
        None => None,
    };

    let node = StateNode {
        id: id.clone(),
        parent,
        children: children_ids,
        kind,
        initial,
        on: BTreeMap::new(),
        entry: entry_raw.into_vec().into_iter().map(convert_action).collect(),
        exit: exit_raw.into_vec().into_iter().map(convert_action).collect(),
        after: BTreeMap::new(),
        always: Vec::new(),
        invoke,
        history,
        history_default: None,
        on_done: None,
        final_output: raw.output,
        meta: raw.meta,
        tags: raw.tags,
        description: raw.description,
    };
    states.insert(id.clone(), node);

    for (event, transitions) in on_raw {
        pending.push(Pending {
            owner: id.clone(),
            field: PendingField::On(event),
            raw: transitions.into_vec(),
        });
    }
    for (delay, transitions) in after_raw {
        let ms: u64 = delay
            .parse()
            .map_err(|_| DefinitionError::Parse(format!("invalid `after` delay {delay:?}")))?;
        pending.push(Pending {
            owner: id.clone(),
            field: PendingField::After(ms),
            raw: transitions.into_vec(),
        });
    }
    let always_vec = always_raw.into_vec();
    if !always_vec.is_empty() {
        pending.push(Pending {
            owner: id.clone(),
            field: PendingField::Always,
            raw: always_vec,
        });
    }
    if let Some(t) = on_done_raw {
        pending.push(Pending {
            owner: id.clone(),
            field: PendingField::OnDone,
            raw: vec![t],
        });
    }
    if let Some(t) = target_str {
        pending.push(Pending {
            owner: id,
            field: PendingField::HistoryDefault,
            raw: vec![RawTransition::Bare(t)],
        });
    }

    Ok(())
}

fn apply_pending(
    pending: Vec<Pending>,
    states: &mut BTreeMap<StateId, StateNode>,
    root_children: &BTreeSet<String>,
) -> Result<(), DefinitionError> {
    for p in pending {
        let resolved: Vec<crate::model::Transition> = p
            .raw
            .into_iter()
            .map(|t| resolve_transition(t, &p.owner, root_children, states))
            .collect::<Result<_, _>>()?;
        match p.field {
            PendingField::On(event) => {
                states.get_mut(&p.owner).unwrap().on.insert(event, resolved);
            }
            PendingField::After(ms) => {
                states.get_mut(&p.owner).unwrap().after.insert(ms, resolved);
            }
            PendingField::Always => {
                states.get_mut(&p.owner).unwrap().always = resolved;
            }
            PendingField::OnDone => {
                states.get_mut(&p.owner).unwrap().on_done = resolved.into_iter().next();
            }
            PendingField::InvokeOnDone => {
                states
                    .get_mut(&p.owner)
                    .unwrap()
                    .invoke
                    .as_mut()
                    .unwrap()
                    .on_done = resolved.into_iter().next();
            }
            PendingField::InvokeOnError => {
                states
                    .get_mut(&p.owner)
                    .unwrap()
                    .invoke
                    .as_mut()
                    .unwrap()
                    .on_error = resolved.into_iter().next();
            }
            PendingField::HistoryDefault => {
                states.get_mut(&p.owner).unwrap().history_default =
                    resolved.into_iter().next().and_then(|t| t.target().cloned());
            }
        }
    }
    Ok(())
}

fn resolve_transition(
    raw: RawTransition,
    owner: &str,
    root_children: &BTreeSet<String>,
    states: &BTreeMap<StateId, StateNode>,
) -> Result<crate::model::Transition, DefinitionError> {
    match raw {
        RawTransition::Bare(target) => {
            let resolved = resolve_target(&target, owner, root_children, states, "target")?;
            Ok(crate::model::Transition {
                targets: vec![resolved],
                guard: None,
                in_state: None,
                actions: vec![],
                internal: false,
            })
        }
        RawTransition::Full {
            target,
            guard,
            in_state,
            actions,
            internal,
        } => {
            let targets = match target {
                None => vec![],
                Some(RawTargets::One(t)) => {
                    vec![resolve_target(&t, owner, root_children, states, "target")?]
                }
                Some(RawTargets::Many(ts)) => ts
                    .iter()
                    .map(|t| resolve_target(t, owner, root_children, states, "target"))
                    .collect::<Result<_, _>>()?,
            };
            let in_state = match in_state {
                Some(s) => Some(resolve_target(&s, owner, root_children, states, "in")?),
                None => None,
            };
            let is_internal = internal || targets.is_empty();
            Ok(crate::model::Transition {
                targets,
                guard,
                in_state,
                actions: actions.into_vec().into_iter().map(convert_action).collect(),
                internal: is_internal,
            })
        }
    }
}

/// §4.1 ordered target-resolution rules.
fn resolve_target(
    raw: &str,
    owner: &str,
    root_children: &BTreeSet<String>,
    states: &BTreeMap<StateId, StateNode>,
    kind: &'static str,
) -> Result<StateId, DefinitionError> {
    let candidate = if let Some(rest) = raw.strip_prefix('#') {
        match rest.find('.') {
            Some(idx) => rest[idx + 1..].to_string(),
            None => rest.to_string(),
        }
    } else if let Some(rest) = raw.strip_prefix('.') {
        rest.to_string()
    } else if root_children.contains(raw) {
        raw.to_string()
    } else {
        let parent = Chart::parent_path(owner);
        let sibling = Chart::join(parent, raw);
        if states.contains_key(&sibling) {
            sibling
        } else {
            raw.to_string()
        }
    };

    if states.contains_key(&candidate) {
        Ok(candidate)
    } else {
        Err(DefinitionError::InvalidReference {
            kind,
            name: raw.to_string(),
            from: owner.to_string(),
        })
    }
}

fn convert_action(raw: RawActionRef) -> ActionRef {
    match raw {
        RawActionRef::Named(n) => ActionRef::Named(n),
        RawActionRef::Assign { assign } => ActionRef::Assign(assign),
        RawActionRef::Raise { raise } => ActionRef::Raise {
            event: raise.event,
            payload: raise.payload,
        },
        RawActionRef::Send { send } => ActionRef::Send {
            target: send.target,
            event: send.event,
            payload: send.payload,
        },
    }
}
