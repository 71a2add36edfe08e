//! Mirror of the definition file with every optional field as `Option`,
//! so "absent" and "zero value" stay distinguishable until defaults are
//! applied explicitly.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml_ng::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawDefinition {
    pub version: Option<String>,
    pub config: Option<RawSettings>,
    pub variables: Option<BTreeMap<String, Value>>,
    pub state_machines: Option<Vec<RawStateMachine>>,
    pub workflows: Option<Vec<RawWorkflow>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawSettings {
    pub shell: Option<String>,
    pub checkpoints: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawStateMachine {
    pub id: Option<String>,
    pub stages: Option<Vec<String>>,
    pub initial_stage: Option<String>,
    pub final_stages: Option<Vec<String>>,
    pub transitions: Option<Vec<RawTransition>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawTransition {
    pub from: Option<Vec<String>>,
    pub to: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawWorkflow {
    pub id: Option<String>,
    pub state_machine: Option<String>,
    pub stages: Option<Vec<RawStage>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawStage {
    pub id: Option<String>,
    pub args: Option<Vec<String>>,
    pub conditions: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
}
