//! Definition validation: a fixed table of named rules, each a plain
//! function over the raw model, run in order. The first failing rule is
//! surfaced as a descriptive error.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml_ng::Value;
use thiserror::Error;
use tracing::debug;

use super::raw::{RawDefinition, RawStateMachine, RawWorkflow};
use crate::engine::variables;
use crate::state_machine::{validate_state_machine, StateMachineDef, Transition, ValidationError};

pub const SUPPORTED_VERSIONS: &[&str] = &["1"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read definition file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse definition file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("invalid {rule}: {message}")]
    Invalid { rule: &'static str, message: String },
    #[error("invalid state machine '{machine}': {source}")]
    StateMachine {
        machine: String,
        #[source]
        source: ValidationError,
    },
}

type Rule = (&'static str, fn(&RawDefinition) -> Result<(), ConfigError>);

/// Every validation rule, resolved at compile time and applied in order.
const RULES: &[Rule] = &[
    ("version", validate_version),
    ("settings", validate_settings),
    ("variables", validate_variables),
    ("state machines", validate_state_machines),
    ("workflows", validate_workflows),
];

pub fn validate(raw: &RawDefinition) -> Result<(), ConfigError> {
    for (rule, check) in RULES {
        debug!(rule, "validating workflow definition");
        check(raw)?;
    }
    Ok(())
}

fn invalid(rule: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        rule,
        message: message.into(),
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").expect("identifier pattern is valid")
    })
}

fn is_identifier(candidate: &str) -> bool {
    identifier_pattern().is_match(candidate)
}

fn validate_version(raw: &RawDefinition) -> Result<(), ConfigError> {
    match raw.version.as_deref() {
        None => Err(invalid("version", "a version is required")),
        Some(version) if SUPPORTED_VERSIONS.contains(&version) => Ok(()),
        Some(version) => Err(invalid("version", format!("unsupported version '{version}'"))),
    }
}

fn validate_settings(raw: &RawDefinition) -> Result<(), ConfigError> {
    if let Some(settings) = &raw.config {
        if let Some(shell) = &settings.shell {
            if shell.trim().is_empty() {
                return Err(invalid("settings", "shell must not be empty"));
            }
        }
    }
    Ok(())
}

fn validate_variables(raw: &RawDefinition) -> Result<(), ConfigError> {
    let Some(variables) = &raw.variables else {
        return Ok(());
    };
    for (name, value) in variables {
        if !is_identifier(name) {
            return Err(invalid("variables", format!("'{name}' is not a valid variable name")));
        }
        if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            return Err(invalid("variables", format!("variable '{name}' must be a scalar")));
        }
    }
    Ok(())
}

fn validate_state_machines(raw: &RawDefinition) -> Result<(), ConfigError> {
    let machines = match &raw.state_machines {
        Some(machines) if !machines.is_empty() => machines,
        _ => return Err(invalid("state machines", "at least one state machine is required")),
    };

    let mut seen = HashSet::new();
    for machine in machines {
        let id = required_machine_id(machine)?;
        if !seen.insert(id) {
            return Err(invalid("state machines", format!("duplicate state machine id '{id}'")));
        }

        let stages = machine
            .stages
            .as_ref()
            .filter(|stages| !stages.is_empty())
            .ok_or_else(|| invalid("state machines", format!("machine '{id}' declares no stages")))?;
        for stage in stages {
            if !is_identifier(stage) {
                return Err(invalid(
                    "state machines",
                    format!("'{stage}' is not a valid stage id in machine '{id}'"),
                ));
            }
        }
        let initial_stage = machine.initial_stage.as_ref().ok_or_else(|| {
            invalid("state machines", format!("machine '{id}' declares no initial stage"))
        })?;
        let final_stages = machine
            .final_stages
            .as_ref()
            .filter(|finals| !finals.is_empty())
            .ok_or_else(|| {
                invalid("state machines", format!("machine '{id}' declares no final stages"))
            })?;
        let transitions = machine
            .transitions
            .as_ref()
            .filter(|transitions| !transitions.is_empty())
            .ok_or_else(|| {
                invalid("state machines", format!("machine '{id}' declares no transitions"))
            })?;

        let mut expanded = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let from = transition
                .from
                .as_ref()
                .filter(|from| !from.is_empty())
                .ok_or_else(|| {
                    invalid("state machines", format!("a transition in machine '{id}' has no source"))
                })?;
            let to = transition
                .to
                .as_ref()
                .filter(|to| !to.is_empty())
                .ok_or_else(|| {
                    invalid(
                        "state machines",
                        format!("a transition in machine '{id}' has no destination"),
                    )
                })?;
            expanded.push(Transition {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let candidate = StateMachineDef {
            id: id.to_string(),
            stages: stages.clone(),
            initial_stage: initial_stage.clone(),
            final_stages: final_stages.clone(),
            transitions: expanded,
        };
        validate_state_machine(&candidate).map_err(|source| ConfigError::StateMachine {
            machine: id.to_string(),
            source,
        })?;
    }
    Ok(())
}

fn validate_workflows(raw: &RawDefinition) -> Result<(), ConfigError> {
    let workflows = match &raw.workflows {
        Some(workflows) if !workflows.is_empty() => workflows,
        _ => return Err(invalid("workflows", "at least one workflow is required")),
    };
    let machines = raw.state_machines.as_deref().unwrap_or_default();

    let mut seen = HashSet::new();
    for workflow in workflows {
        let id = required_workflow_id(workflow)?;
        if !seen.insert(id) {
            return Err(invalid("workflows", format!("duplicate workflow id '{id}'")));
        }

        let machine_id = workflow.state_machine.as_ref().ok_or_else(|| {
            invalid("workflows", format!("workflow '{id}' names no state machine"))
        })?;
        let machine_stages = machine_by_id(machines, machine_id).ok_or_else(|| {
            invalid(
                "workflows",
                format!("workflow '{id}' references undefined state machine '{machine_id}'"),
            )
        })?;

        let stages = workflow
            .stages
            .as_ref()
            .filter(|stages| !stages.is_empty())
            .ok_or_else(|| invalid("workflows", format!("workflow '{id}' declares no stages")))?;
        for stage in stages {
            let stage_id = stage.id.as_ref().ok_or_else(|| {
                invalid("workflows", format!("a stage of workflow '{id}' has no id"))
            })?;
            if !machine_stages.iter().any(|s| s == stage_id) {
                return Err(invalid(
                    "workflows",
                    format!("stage '{stage_id}' of workflow '{id}' is not a stage of machine '{machine_id}'"),
                ));
            }
            for declaration in stage.args.as_deref().unwrap_or_default() {
                if !variables::is_valid_declaration(declaration) {
                    return Err(invalid(
                        "workflows",
                        format!("invalid argument declaration '{declaration}' in stage '{stage_id}'"),
                    ));
                }
            }
            for command in stage
                .conditions
                .as_deref()
                .unwrap_or_default()
                .iter()
                .chain(stage.actions.as_deref().unwrap_or_default())
            {
                if command.trim().is_empty() {
                    return Err(invalid(
                        "workflows",
                        format!("stage '{stage_id}' contains an empty command"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn required_machine_id(machine: &RawStateMachine) -> Result<&str, ConfigError> {
    let id = machine
        .id
        .as_deref()
        .ok_or_else(|| invalid("state machines", "every state machine needs an id"))?;
    if !is_identifier(id) {
        return Err(invalid("state machines", format!("'{id}' is not a valid machine id")));
    }
    Ok(id)
}

fn required_workflow_id(workflow: &RawWorkflow) -> Result<&str, ConfigError> {
    let id = workflow
        .id
        .as_deref()
        .ok_or_else(|| invalid("workflows", "every workflow needs an id"))?;
    if !is_identifier(id) {
        return Err(invalid("workflows", format!("'{id}' is not a valid workflow id")));
    }
    Ok(id)
}

fn machine_by_id<'a>(machines: &'a [RawStateMachine], id: &str) -> Option<&'a Vec<String>> {
    machines
        .iter()
        .find(|machine| machine.id.as_deref() == Some(id))
        .and_then(|machine| machine.stages.as_ref())
}
