use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix that turns a transition endpoint into "every stage except this one".
pub const NEGATION_MARKER: char = '!';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("stage '{0}' is not defined in the state machine")]
    UndefinedStage(String),
}

/// A configured state machine: the stages a workflow can move through and
/// the transitions allowed between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineDef {
    pub id: String,
    pub stages: Vec<String>,
    pub initial_stage: String,
    pub final_stages: Vec<String>,
    pub transitions: Vec<Transition>,
}

/// One allowed transition. Both endpoints are sets: a transition fires from
/// any stage in `from` to any stage in `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Vec<String>,
    pub to: Vec<String>,
}

impl StateMachineDef {
    pub fn is_final(&self, stage: &str) -> bool {
        self.final_stages.iter().any(|s| s == stage)
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    /// Returns the transitions with every negated endpoint expanded, so that
    /// consumers never see the negation marker.
    pub fn expanded_transitions(&self) -> Result<Vec<Transition>, ModelError> {
        self.transitions
            .iter()
            .map(|t| {
                Ok(Transition {
                    from: expand_endpoints(&t.from, &self.stages)?,
                    to: expand_endpoints(&t.to, &self.stages)?,
                })
            })
            .collect()
    }
}

/// Expands a negated stage name (`!stage`) into every other declared stage.
/// Fails if the named stage is not part of `all_stages`.
pub fn expand_stages(prefixed_stage: &str, all_stages: &[String]) -> Result<Vec<String>, ModelError> {
    let negated = prefixed_stage
        .strip_prefix(NEGATION_MARKER)
        .unwrap_or(prefixed_stage);
    if !all_stages.iter().any(|s| s == negated) {
        return Err(ModelError::UndefinedStage(negated.to_string()));
    }
    Ok(all_stages.iter().filter(|s| *s != negated).cloned().collect())
}

fn expand_endpoints(endpoints: &[String], all_stages: &[String]) -> Result<Vec<String>, ModelError> {
    let mut expanded = Vec::new();
    for endpoint in endpoints {
        if endpoint.starts_with(NEGATION_MARKER) {
            expanded.extend(expand_stages(endpoint, all_stages)?);
        } else {
            if !all_stages.iter().any(|s| s == endpoint) {
                return Err(ModelError::UndefinedStage(endpoint.clone()));
            }
            expanded.push(endpoint.clone());
        }
    }
    Ok(expanded)
}
