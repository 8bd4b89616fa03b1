//! The wire-shaped DTO the relaxed-JSON grammar (§6) decodes into, prior to
//! resolution into the immutable `Chart` model. Grounded on the teacher's
//! `authoring/dto.rs` (a DTO layer preceding IR).

use crate::model::Value;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct RawChart {
    pub id: String,
    #[serde(flatten)]
    pub root: RawState,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawState {
    pub initial: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub history: Option<String>,
    #[serde(default)]
    pub states: BTreeMap<String, RawState>,
    #[serde(default)]
    pub on: BTreeMap<String, RawTransitions>,
    #[serde(default)]
    pub entry: RawActions,
    #[serde(default)]
    pub exit: RawActions,
    #[serde(default)]
    pub after: BTreeMap<String, RawTransitions>,
    #[serde(default)]
    pub always: RawTransitions,
    pub invoke: Option<RawInvoke>,
    #[serde(rename = "onDone")]
    pub on_done: Option<RawTransition>,
    pub output: Option<Value>,
    pub meta: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    /// History-node default target.
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawInvoke {
    pub src: String,
    pub id: Option<String>,
    #[serde(rename = "onDone")]
    pub on_done: Option<RawTransition>,
    #[serde(rename = "onError")]
    pub on_error: Option<RawTransition>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTargets {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTransition {
    Bare(String),
    Full {
        target: Option<RawTargets>,
        #[serde(rename = "cond")]
        guard: Option<String>,
        #[serde(rename = "in")]
        in_state: Option<String>,
        #[serde(default)]
        actions: RawActions,
        #[serde(default)]
        internal: bool,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
pub enum RawTransitions {
    #[default]
    None,
    One(RawTransition),
    Many(Vec<RawTransition>),
}

impl RawTransitions {
    pub fn into_vec(self) -> Vec<RawTransition> {
        match self {
            RawTransitions::None => vec![],
            RawTransitions::One(t) => vec![t],
            RawTransitions::Many(ts) => ts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawActionRef {
    Named(String),
    Assign { assign: BTreeMap<String, Value> },
    Raise { raise: RawRaise },
    Send { send: RawSend },
}

#[derive(Debug, Deserialize)]
pub struct RawRaise {
    pub event: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawSend {
    pub target: String,
    pub event: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
pub enum RawActions {
    #[default]
    None,
    One(RawActionRef),
    Many(Vec<RawActionRef>),
}

impl RawActions {
    pub fn into_vec(self) -> Vec<RawActionRef> {
        match self {
            RawActions::None => vec![],
            RawActions::One(a) => vec![a],
            RawActions::Many(a) => a,
        }
    }
}
