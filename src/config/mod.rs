//! Workflow definition loading.
//!
//! The definition file is YAML. Loading is an explicit pipeline: decode into
//! a raw model where every optional field is an `Option`, run the fixed
//! validation table, fill defaults, expand negated transition endpoints and
//! convert into the plain [`WorkflowDefinition`] the rest of the crate
//! consumes. The resulting value is threaded through constructors; there is
//! no global configuration state.

pub mod model;
pub mod raw;
pub mod validate;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_yaml_ng::Value;
use tracing::debug;

pub use self::model::{Settings, StageSpec, WorkflowDefinition, WorkflowSpec};
pub use self::validate::{ConfigError, SUPPORTED_VERSIONS};

use self::raw::RawDefinition;
use crate::state_machine::{StateMachineDef, Transition};

/// Default definition file name, relative to the invocation root.
pub const DEFAULT_DEFINITION_FILE: &str = "stagehand.yaml";

const DEFAULT_SHELL_FALLBACK: &str = "/usr/bin/env bash";

/// Reads, validates and resolves a workflow definition file.
pub fn load(path: &Path) -> Result<WorkflowDefinition, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawDefinition = serde_yaml_ng::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let definition = resolve(raw)?;
    debug!(path = %path.display(), workflows = definition.workflows.len(), "definition loaded");
    Ok(definition)
}

/// Validates a raw definition and converts it into the runtime value.
pub fn resolve(raw: RawDefinition) -> Result<WorkflowDefinition, ConfigError> {
    validate::validate(&raw)?;
    convert(raw)
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL_FALLBACK.to_string())
}

fn convert(raw: RawDefinition) -> Result<WorkflowDefinition, ConfigError> {
    let settings = raw.config.unwrap_or(raw::RawSettings {
        shell: None,
        checkpoints: None,
    });
    let settings = Settings {
        shell: settings.shell.unwrap_or_else(default_shell),
        checkpoints: settings.checkpoints.unwrap_or(true),
    };

    let variables = raw
        .variables
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, scalar_to_string(value)))
        .collect::<BTreeMap<String, String>>();

    let mut state_machines = Vec::new();
    for machine in raw.state_machines.unwrap_or_default() {
        let machine = StateMachineDef {
            // The validation table guarantees these are present.
            id: machine.id.unwrap_or_default(),
            stages: machine.stages.unwrap_or_default(),
            initial_stage: machine.initial_stage.unwrap_or_default(),
            final_stages: machine.final_stages.unwrap_or_default(),
            transitions: machine
                .transitions
                .unwrap_or_default()
                .into_iter()
                .map(|transition| Transition {
                    from: transition.from.unwrap_or_default(),
                    to: transition.to.unwrap_or_default(),
                })
                .collect(),
        };
        // Expand negated endpoints here so nothing downstream ever sees the
        // negation marker.
        let expanded = machine
            .expanded_transitions()
            .map_err(|source| ConfigError::StateMachine {
                machine: machine.id.clone(),
                source: source.into(),
            })?;
        state_machines.push(StateMachineDef {
            transitions: expanded,
            ..machine
        });
    }

    let workflows = raw
        .workflows
        .unwrap_or_default()
        .into_iter()
        .map(|workflow| WorkflowSpec {
            id: workflow.id.unwrap_or_default(),
            state_machine: workflow.state_machine.unwrap_or_default(),
            stages: workflow
                .stages
                .unwrap_or_default()
                .into_iter()
                .map(|stage| StageSpec {
                    id: stage.id.unwrap_or_default(),
                    args: stage.args.unwrap_or_default(),
                    conditions: stage.conditions.unwrap_or_default(),
                    actions: stage.actions.unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    Ok(WorkflowDefinition {
        version: raw.version.unwrap_or_default(),
        settings,
        variables,
        state_machines,
        workflows,
    })
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        // Non-scalars are rejected by validation before conversion runs.
        _ => String::new(),
    }
}
