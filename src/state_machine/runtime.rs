use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use super::model::{ModelError, StateMachineDef};

/// The synthetic state every machine starts in, before its initial stage.
/// Shared by all machines and never a declared stage.
pub const ORIGIN_STATE: &str = "origin";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("state machine '{0}' is not defined")]
    UnknownMachine(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Answers transition-legality and next-stage queries for a set of
/// validated state machines, looked up by machine id.
///
/// Each machine is compiled once into a plain lookup table from a stage to
/// the set of stages reachable by one transition, so queries carry no
/// mutable state and are idempotent.
pub struct FsmService {
    machines: HashMap<String, TransitionTable>,
}

struct TransitionTable {
    initial_stage: String,
    final_stages: BTreeSet<String>,
    reachable: BTreeMap<String, BTreeSet<String>>,
}

impl FsmService {
    pub fn new(machines: &[StateMachineDef]) -> Result<Self, FsmError> {
        let mut compiled = HashMap::with_capacity(machines.len());
        for machine in machines {
            compiled.insert(machine.id.clone(), compile(machine)?);
        }
        Ok(Self { machines: compiled })
    }

    /// The state preceding every machine's initial stage.
    pub fn origin_state(&self) -> &'static str {
        ORIGIN_STATE
    }

    /// The one stage reachable directly from the origin state.
    pub fn initial_state(&self, machine_id: &str) -> Result<&str, FsmError> {
        Ok(&self.machine(machine_id)?.initial_stage)
    }

    /// The stages reachable from `current` by exactly one transition.
    /// Empty for final stages.
    pub fn available_states(
        &self,
        machine_id: &str,
        current: &str,
    ) -> Result<Vec<String>, FsmError> {
        let table = self.machine(machine_id)?;
        Ok(table
            .reachable
            .get(current)
            .map(|next| next.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Whether the machine may move from `from` to `to` in one transition.
    /// Callers that have not advanced past the origin pass [`ORIGIN_STATE`]
    /// as `from`.
    pub fn is_transition_valid(
        &self,
        machine_id: &str,
        from: &str,
        to: &str,
    ) -> Result<bool, FsmError> {
        let table = self.machine(machine_id)?;
        Ok(table
            .reachable
            .get(from)
            .is_some_and(|next| next.contains(to)))
    }

    /// Whether `stage` is a declared final stage of the machine.
    pub fn is_final_state(&self, machine_id: &str, stage: &str) -> Result<bool, FsmError> {
        let table = self.machine(machine_id)?;
        Ok(stage != ORIGIN_STATE && table.final_stages.contains(stage))
    }

    fn machine(&self, machine_id: &str) -> Result<&TransitionTable, FsmError> {
        self.machines
            .get(machine_id)
            .ok_or_else(|| FsmError::UnknownMachine(machine_id.to_string()))
    }
}

fn compile(machine: &StateMachineDef) -> Result<TransitionTable, FsmError> {
    let transitions = machine.expanded_transitions()?;

    let mut reachable: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    reachable.insert(
        ORIGIN_STATE.to_string(),
        BTreeSet::from([machine.initial_stage.clone()]),
    );
    for stage in &machine.stages {
        reachable.entry(stage.clone()).or_default();
    }

    // A stage's legal sources are the from-sets of every transition that
    // targets it. The initial stage's sole source stays the origin state.
    for stage in &machine.stages {
        if *stage == machine.initial_stage {
            continue;
        }
        for transition in &transitions {
            if !transition.to.iter().any(|to| to == stage) {
                continue;
            }
            for from in &transition.from {
                reachable.entry(from.clone()).or_default().insert(stage.clone());
            }
        }
    }

    Ok(TransitionTable {
        initial_stage: machine.initial_stage.clone(),
        final_stages: machine.final_stages.iter().cloned().collect(),
        reachable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::model::Transition;

    fn service() -> FsmService {
        let machine = StateMachineDef {
            id: "state-machine-1".to_string(),
            stages: vec![
                "stage-1".to_string(),
                "stage-2".to_string(),
                "stage-3".to_string(),
                "stage-4".to_string(),
            ],
            initial_stage: "stage-1".to_string(),
            final_stages: vec!["stage-4".to_string()],
            transitions: vec![
                Transition {
                    from: vec!["stage-1".to_string()],
                    to: vec!["stage-2".to_string(), "stage-3".to_string()],
                },
                Transition {
                    from: vec!["stage-2".to_string(), "stage-3".to_string()],
                    to: vec!["stage-4".to_string()],
                },
            ],
        };
        FsmService::new(&[machine]).unwrap()
    }

    #[test]
    fn returns_initial_state() {
        assert_eq!(service().initial_state("state-machine-1").unwrap(), "stage-1");
    }

    #[test]
    fn returns_available_states() {
        let service = service();
        assert_eq!(
            service.available_states("state-machine-1", "stage-1").unwrap(),
            vec!["stage-2".to_string(), "stage-3".to_string()]
        );
        assert_eq!(
            service.available_states("state-machine-1", "stage-2").unwrap(),
            vec!["stage-4".to_string()]
        );
        assert_eq!(
            service.available_states("state-machine-1", "stage-3").unwrap(),
            vec!["stage-4".to_string()]
        );
        assert!(service
            .available_states("state-machine-1", "stage-4")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn validates_transitions_in_both_directions() {
        let service = service();
        assert!(service
            .is_transition_valid("state-machine-1", ORIGIN_STATE, "stage-1")
            .unwrap());
        assert!(service
            .is_transition_valid("state-machine-1", "stage-1", "stage-2")
            .unwrap());
        assert!(service
            .is_transition_valid("state-machine-1", "stage-3", "stage-4")
            .unwrap());
        assert!(!service
            .is_transition_valid("state-machine-1", "stage-2", "stage-1")
            .unwrap());
        assert!(!service
            .is_transition_valid("state-machine-1", "stage-4", "stage-2")
            .unwrap());
    }

    #[test]
    fn identifies_final_states() {
        let service = service();
        assert!(service.is_final_state("state-machine-1", "stage-4").unwrap());
        assert!(!service.is_final_state("state-machine-1", "stage-1").unwrap());
        assert!(!service.is_final_state("state-machine-1", ORIGIN_STATE).unwrap());
    }

    #[test]
    fn queries_are_idempotent() {
        let service = service();
        let first = service.available_states("state-machine-1", "stage-1").unwrap();
        let second = service.available_states("state-machine-1", "stage-1").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            service.is_final_state("state-machine-1", "stage-4").unwrap(),
            service.is_final_state("state-machine-1", "stage-4").unwrap()
        );
    }

    #[test]
    fn unknown_machine_is_an_error() {
        assert_eq!(
            service().initial_state("nope").unwrap_err(),
            FsmError::UnknownMachine("nope".to_string())
        );
    }
}
