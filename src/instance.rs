//! Workflow instances and their execution history.
//!
//! An instance is one running (or completed) occurrence of a configured
//! workflow. Every stage advance appends an [`Execution`] record; the
//! instance owns its history outright and is persisted as a single value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of the human-typeable id prefix used for interactive lookup.
pub const SHORT_PREFIX_LEN: usize = 6;

/// Checkpoint value meaning "no action has failed".
pub const NO_CHECKPOINT: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("execution has already finished")]
    ExecutionAlreadyFinished,
    #[error("workflow instance has no execution in flight")]
    NoExecution,
}

/// The position of an instance after an execution settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// The instance advanced and remains active.
    Started,
    /// The execution failed; the instance did not advance.
    Failed,
    /// The instance reached a final stage.
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    pub version: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub version: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One recorded attempt to advance an instance by one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub from_stage: String,
    pub target_stage: String,
    pub args: Vec<String>,
    /// Index of the first failed action, or [`NO_CHECKPOINT`].
    pub checkpoint: i64,
    pub failed: bool,
    pub metadata: ExecutionMetadata,
}

/// A single occurrence of a workflow, with its execution history
/// (most recent first) and accumulated variable bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub short_prefix: String,
    pub workflow_name: String,
    pub is_active: bool,
    pub executions: Vec<Execution>,
    pub variables: BTreeMap<String, String>,
    pub metadata: InstanceMetadata,
}

impl WorkflowInstance {
    /// Creates a fresh, inactive instance seeded with the definition's
    /// global variables.
    pub fn new(workflow_name: &str, seed_variables: BTreeMap<String, String>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            short_prefix: id[..SHORT_PREFIX_LEN].to_string(),
            id,
            workflow_name: workflow_name.to_string(),
            is_active: false,
            executions: Vec::new(),
            variables: seed_variables,
            metadata: InstanceMetadata::default(),
        }
    }

    /// The head of the execution history, if any stage advance was recorded.
    pub fn latest_execution(&self) -> Option<&Execution> {
        self.executions.first()
    }

    /// Records the start of a stage advance and marks the instance active.
    pub fn start_execution(&mut self, from_stage: &str, target_stage: &str, args: &[String]) {
        let now = Utc::now();
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            from_stage: from_stage.to_string(),
            target_stage: target_stage.to_string(),
            args: args.to_vec(),
            checkpoint: NO_CHECKPOINT,
            failed: false,
            metadata: ExecutionMetadata {
                version: 0,
                started_at: now,
                finished_at: None,
            },
        };
        self.executions.insert(0, execution);
        self.is_active = true;
        if self.metadata.started_at.is_none() {
            self.metadata.started_at = Some(now);
        }
        self.metadata.updated_at = Some(now);
    }

    /// Stores the index of the first failed action on the execution in flight.
    pub fn set_checkpoint(&mut self, checkpoint: i64) -> Result<(), InstanceError> {
        let execution = self.executions.first_mut().ok_or(InstanceError::NoExecution)?;
        execution.checkpoint = checkpoint;
        Ok(())
    }

    /// Settles the execution in flight. A failed execution keeps the instance
    /// at its previous stage; a finished one deactivates the instance.
    /// Settling twice is an error.
    pub fn finish_execution(&mut self, state: InstanceState) -> Result<(), InstanceError> {
        let now = Utc::now();
        let execution = self.executions.first_mut().ok_or(InstanceError::NoExecution)?;
        if execution.metadata.finished_at.is_some() {
            return Err(InstanceError::ExecutionAlreadyFinished);
        }
        execution.metadata.finished_at = Some(now);
        if state == InstanceState::Failed {
            execution.failed = true;
            execution.target_stage = execution.from_stage.clone();
        }
        self.is_active = state != InstanceState::Finished;
        self.metadata.updated_at = Some(now);
        if state == InstanceState::Finished {
            self.metadata.finished_at = Some(now);
        }
        Ok(())
    }

    /// Marks the instance cancelled without running any stage.
    pub fn cancel(&mut self) {
        let now = Utc::now();
        self.is_active = false;
        self.metadata.updated_at = Some(now);
        self.metadata.finished_at = Some(now);
    }

    pub fn merge_variables(&mut self, variables: impl IntoIterator<Item = (String, String)>) {
        self.variables.extend(variables);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Vec<String> {
        vec!["one".to_string(), "two".to_string()]
    }

    #[test]
    fn new_instance_is_inactive_with_short_prefix() {
        let instance = WorkflowInstance::new("release", BTreeMap::new());
        assert_eq!(instance.short_prefix, instance.id[..SHORT_PREFIX_LEN]);
        assert!(!instance.is_active);
        assert!(instance.latest_execution().is_none());
        assert_eq!(instance.metadata, InstanceMetadata::default());
    }

    #[test]
    fn start_execution_prepends_and_activates() {
        let mut instance = WorkflowInstance::new("release", BTreeMap::new());
        instance.start_execution("origin", "start", &args());
        instance.finish_execution(InstanceState::Started).unwrap();
        instance.start_execution("start", "finish", &args());

        assert!(instance.is_active);
        assert_eq!(instance.executions.len(), 2);
        let latest = instance.latest_execution().unwrap();
        assert_eq!(latest.from_stage, "start");
        assert_eq!(latest.target_stage, "finish");
        assert_eq!(latest.checkpoint, NO_CHECKPOINT);
        assert!(instance.metadata.started_at.is_some());
    }

    #[test]
    fn failed_execution_rolls_back_target_stage() {
        let mut instance = WorkflowInstance::new("release", BTreeMap::new());
        instance.start_execution("origin", "start", &args());
        instance.set_checkpoint(2).unwrap();
        instance.finish_execution(InstanceState::Failed).unwrap();

        let latest = instance.latest_execution().unwrap();
        assert!(latest.failed);
        assert_eq!(latest.checkpoint, 2);
        assert_eq!(latest.target_stage, "origin");
        assert!(instance.is_active);
    }

    #[test]
    fn finished_execution_deactivates_instance() {
        let mut instance = WorkflowInstance::new("release", BTreeMap::new());
        instance.start_execution("origin", "finish", &[]);
        instance.finish_execution(InstanceState::Finished).unwrap();

        assert!(!instance.is_active);
        assert!(instance.metadata.finished_at.is_some());
        assert!(instance.latest_execution().unwrap().metadata.finished_at.is_some());
    }

    #[test]
    fn finishing_twice_is_an_error() {
        let mut instance = WorkflowInstance::new("release", BTreeMap::new());
        instance.start_execution("origin", "start", &[]);
        instance.finish_execution(InstanceState::Started).unwrap();
        assert_eq!(
            instance.finish_execution(InstanceState::Started).unwrap_err(),
            InstanceError::ExecutionAlreadyFinished
        );
    }

    #[test]
    fn cancel_deactivates_and_stamps_finish() {
        let mut instance = WorkflowInstance::new("release", BTreeMap::new());
        instance.start_execution("origin", "start", &[]);
        instance.finish_execution(InstanceState::Started).unwrap();
        instance.cancel();
        assert!(!instance.is_active);
        assert!(instance.metadata.finished_at.is_some());
    }
}
