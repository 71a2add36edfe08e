//! Execution engine: advances one workflow instance by one stage.
//!
//! A stage advance checks transition legality against the FSM runtime, runs
//! the stage's conditions and actions through the command executor with
//! variable substitution, and persists the updated instance. When
//! checkpointed resume is enabled, a failed action records its index so a
//! re-invocation with identical arguments picks up where it left off.

pub mod executor;
pub mod variables;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::WorkflowDefinition;
use crate::instance::{InstanceError, InstanceState, WorkflowInstance};
use crate::sink::OutputSink;
use crate::state_machine::{FsmError, FsmService, ORIGIN_STATE};
use crate::store::{StoreError, WorkflowStore};
use self::executor::{CommandExecutor, CommandFailure};
use self::variables::VariableError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow '{0}' is not defined")]
    UnknownWorkflow(String),
    #[error("stage '{stage}' is not part of workflow '{workflow}'")]
    UnknownStage { workflow: String, stage: String },
    #[error("no instance of workflow '{workflow}' matches '{reference}'")]
    InstanceNotFound { workflow: String, reference: String },
    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },
    #[error("stage '{stage}' expects {expected} argument(s) but {supplied} were supplied")]
    ArgumentCountMismatch {
        stage: String,
        expected: usize,
        supplied: usize,
    },
    #[error("arguments {supplied:?} do not match the failed execution's arguments {recorded:?}")]
    ArgumentMismatch {
        supplied: Vec<String>,
        recorded: Vec<String>,
    },
    #[error("condition failed: {0}")]
    ConditionFailed(CommandFailure),
    #[error("action failed: {0}")]
    ActionFailed(CommandFailure),
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error(transparent)]
    Fsm(#[from] FsmError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error("storage failure while {operation}: {source}")]
    Store {
        operation: &'static str,
        source: StoreError,
    },
    #[error("could not write to output sink: {0}")]
    Sink(anyhow::Error),
}

/// Orchestrates stage advances against a workflow store.
pub struct Engine<'a> {
    store: &'a WorkflowStore,
}

impl<'a> Engine<'a> {
    pub fn new(store: &'a WorkflowStore) -> Self {
        Self { store }
    }

    /// Advances a workflow instance by one stage.
    ///
    /// With no `instance_prefix` a fresh instance is created; otherwise the
    /// instance is looked up by id prefix. Conditions run first and are never
    /// checkpointed; actions resume from the recorded checkpoint when the
    /// previous execution failed with identical arguments.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<E, S>(
        &self,
        instance_prefix: Option<&str>,
        args: &[String],
        workflow_name: &str,
        stage_id: &str,
        definition: &WorkflowDefinition,
        executor: &mut E,
        sink: &mut S,
    ) -> Result<(), EngineError>
    where
        E: CommandExecutor + ?Sized,
        S: OutputSink + ?Sized,
    {
        let workflow = definition
            .workflow(workflow_name)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_name.to_string()))?;
        let stage = workflow.stage(stage_id).ok_or_else(|| EngineError::UnknownStage {
            workflow: workflow_name.to_string(),
            stage: stage_id.to_string(),
        })?;
        let fsm = FsmService::new(&definition.state_machines)?;
        let machine_id = workflow.state_machine.as_str();

        let mut instance = match instance_prefix {
            None => {
                let instance =
                    WorkflowInstance::new(workflow_name, definition.variables.clone());
                write(sink, &format!("Workflow instance {} created", instance.id))?;
                instance
            }
            Some(prefix) => self
                .store
                .get_by_prefix(workflow_name, prefix)
                .map_err(|source| EngineError::Store {
                    operation: "resolving the instance",
                    source,
                })?
                .ok_or_else(|| EngineError::InstanceNotFound {
                    workflow: workflow_name.to_string(),
                    reference: prefix.to_string(),
                })?,
        };

        let from_stage = instance
            .latest_execution()
            .map(|execution| execution.target_stage.clone())
            .unwrap_or_else(|| ORIGIN_STATE.to_string());

        if !fsm.is_transition_valid(machine_id, &from_stage, stage_id)? {
            return Err(EngineError::InvalidTransition {
                from: from_stage,
                to: stage_id.to_string(),
            });
        }

        let checkpoint = self.resume_checkpoint(&instance, args, definition)?;

        if args.len() != stage.args.len() {
            return Err(EngineError::ArgumentCountMismatch {
                stage: stage_id.to_string(),
                expected: stage.args.len(),
                supplied: args.len(),
            });
        }
        let mut bindings = Vec::with_capacity(stage.args.len());
        for (declaration, value) in stage.args.iter().zip(args) {
            bindings.push((variables::declared_name(declaration)?, value.clone()));
        }
        instance.merge_variables(bindings);

        instance.start_execution(&from_stage, stage_id, args);
        info!(
            workflow = %workflow_name,
            instance = %instance.id,
            from = %from_stage,
            to = %stage_id,
            checkpoint,
            "advancing workflow instance"
        );

        executor.configure(&definition.settings.shell);

        if !stage.conditions.is_empty() {
            write(sink, "Running conditions...")?;
            for condition in &stage.conditions {
                let command = variables::substitute(condition, &instance.variables)?;
                match executor.execute(&command).await {
                    Ok(output) => write(sink, &output)?,
                    Err(failure) => {
                        // A failed condition aborts the advance before anything
                        // is persisted; there is nothing to resume.
                        write(sink, &failure.output)?;
                        return Err(EngineError::ConditionFailed(failure));
                    }
                }
            }
        }

        if !stage.actions.is_empty() {
            write(sink, "Running actions...")?;
        }
        for (index, action) in stage.actions.iter().enumerate().skip(checkpoint) {
            let command = variables::substitute(action, &instance.variables)?;
            match executor.execute(&command).await {
                Ok(output) => write(sink, &output)?,
                Err(failure) => {
                    write(sink, &failure.output)?;
                    if definition.settings.checkpoints {
                        instance.set_checkpoint(index as i64)?;
                        write(sink, &format!("Checkpoint set on command: {action}"))?;
                        instance.finish_execution(InstanceState::Failed)?;
                        self.store.put(&instance).map_err(|source| EngineError::Store {
                            operation: "persisting the checkpoint",
                            source,
                        })?;
                    }
                    return Err(EngineError::ActionFailed(failure));
                }
            }
        }

        let outcome = if fsm.is_final_state(machine_id, stage_id)? {
            InstanceState::Finished
        } else {
            InstanceState::Started
        };
        instance.finish_execution(outcome)?;
        self.store.put(&instance).map_err(|source| EngineError::Store {
            operation: "persisting the instance",
            source,
        })?;
        debug!(instance = %instance.id, active = instance.is_active, "instance persisted");
        Ok(())
    }

    /// Marks an instance cancelled without running any stage.
    pub fn cancel<S>(
        &self,
        instance_id: &str,
        workflow_name: &str,
        sink: &mut S,
    ) -> Result<(), EngineError>
    where
        S: OutputSink + ?Sized,
    {
        let mut instance = self
            .store
            .get(workflow_name, instance_id)
            .map_err(|source| EngineError::Store {
                operation: "resolving the instance",
                source,
            })?
            .ok_or_else(|| EngineError::InstanceNotFound {
                workflow: workflow_name.to_string(),
                reference: instance_id.to_string(),
            })?;
        instance.cancel();
        self.store.put(&instance).map_err(|source| EngineError::Store {
            operation: "persisting the instance",
            source,
        })?;
        write(sink, &format!("Workflow instance {} cancelled", instance.id))?;
        Ok(())
    }

    /// Where the action list starts: 0, unless checkpointing is on and the
    /// latest execution failed with identical arguments, in which case it is
    /// the recorded checkpoint. Differing arguments on a resume are rejected
    /// before any command runs.
    fn resume_checkpoint(
        &self,
        instance: &WorkflowInstance,
        args: &[String],
        definition: &WorkflowDefinition,
    ) -> Result<usize, EngineError> {
        if !definition.settings.checkpoints {
            return Ok(0);
        }
        let Some(latest) = instance.latest_execution() else {
            return Ok(0);
        };
        if !latest.failed {
            return Ok(0);
        }
        if latest.args != args {
            return Err(EngineError::ArgumentMismatch {
                supplied: args.to_vec(),
                recorded: latest.args.clone(),
            });
        }
        if latest.checkpoint >= 0 {
            Ok(latest.checkpoint as usize)
        } else {
            Ok(0)
        }
    }
}

fn write<S: OutputSink + ?Sized>(sink: &mut S, text: &str) -> Result<(), EngineError> {
    sink.write(text).map_err(EngineError::Sink)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use mockall::predicate::eq;

    use super::executor::MockCommandExecutor;
    use super::*;
    use crate::config::{Settings, StageSpec, WorkflowSpec};
    use crate::state_machine::Transition;

    struct NullSink;

    impl OutputSink for NullSink {
        fn write(&mut self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            version: "1".to_string(),
            settings: Settings {
                shell: "/bin/zsh".to_string(),
                checkpoints: true,
            },
            variables: BTreeMap::new(),
            state_machines: vec![crate::state_machine::StateMachineDef {
                id: "machine".to_string(),
                stages: vec!["start".to_string(), "finish".to_string()],
                initial_stage: "start".to_string(),
                final_stages: vec!["finish".to_string()],
                transitions: vec![Transition {
                    from: vec!["start".to_string()],
                    to: vec!["finish".to_string()],
                }],
            }],
            workflows: vec![WorkflowSpec {
                id: "feature".to_string(),
                state_machine: "machine".to_string(),
                stages: vec![StageSpec {
                    id: "start".to_string(),
                    args: vec![],
                    conditions: vec![],
                    actions: vec!["ACTION".to_string()],
                }],
            }],
        }
    }

    #[tokio::test]
    async fn configures_the_executor_and_runs_actions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::open(dir.path().join("store")).unwrap();
        let engine = Engine::new(&store);

        let mut executor = MockCommandExecutor::new();
        executor
            .expect_configure()
            .with(eq("/bin/zsh"))
            .times(1)
            .return_const(());
        executor
            .expect_execute()
            .with(eq("ACTION"))
            .times(1)
            .returning(|_| Ok("done".to_string()));

        engine
            .run(None, &[], "feature", "start", &definition(), &mut executor, &mut NullSink)
            .await
            .unwrap();

        let instances = store.list("feature", 0, true).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].latest_execution().unwrap().target_stage, "start");
    }
}
