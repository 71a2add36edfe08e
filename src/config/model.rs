use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state_machine::StateMachineDef;

/// A fully validated workflow definition, ready for the engine.
///
/// Produced by [`load`](super::load); by the time a value of this type
/// exists, every state machine graph has been validated, every negated
/// transition endpoint expanded, and every optional field defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub version: String,
    pub settings: Settings,
    /// Global variables, seeded into every new instance.
    pub variables: BTreeMap<String, String>,
    pub state_machines: Vec<StateMachineDef>,
    pub workflows: Vec<WorkflowSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Shell invocation commands run under, e.g. `/usr/bin/env bash`.
    pub shell: String,
    /// Whether failed actions record a checkpoint for resume.
    pub checkpoints: bool,
}

/// One declared workflow: a name, the state machine governing it and the
/// stages it can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: String,
    pub state_machine: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    /// Variable declarations, `< name | Description >`, bound positionally.
    pub args: Vec<String>,
    pub conditions: Vec<String>,
    pub actions: Vec<String>,
}

impl WorkflowDefinition {
    pub fn workflow(&self, name: &str) -> Option<&WorkflowSpec> {
        self.workflows.iter().find(|workflow| workflow.id == name)
    }

    pub fn state_machine(&self, id: &str) -> Option<&StateMachineDef> {
        self.state_machines.iter().find(|machine| machine.id == id)
    }
}

impl WorkflowSpec {
    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.id == id)
    }
}
