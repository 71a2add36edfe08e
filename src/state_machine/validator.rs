use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use petgraph::Direction;
use thiserror::Error;

use super::model::{ModelError, StateMachineDef, Transition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("initial stage '{0}' cannot be the destination of a transition")]
    InitialStageIsDestination(String),
    #[error("cannot reach a final stage from stage '{0}'")]
    UnreachableFinalStage(String),
    #[error("final stage '{0}' cannot be the source of a transition")]
    FinalStageIsSource(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Decides whether a state machine definition is well-formed.
///
/// The rules, checked in order against the expanded transition graph:
/// the initial stage has no incoming edges, every non-final stage can reach
/// at least one final stage, and no final stage has outgoing edges.
/// Non-final stages may form cycles as long as a final stage stays reachable.
pub fn validate_state_machine(machine: &StateMachineDef) -> Result<(), ValidationError> {
    if !machine.has_stage(&machine.initial_stage) {
        return Err(ModelError::UndefinedStage(machine.initial_stage.clone()).into());
    }
    for final_stage in &machine.final_stages {
        if !machine.has_stage(final_stage) {
            return Err(ModelError::UndefinedStage(final_stage.clone()).into());
        }
    }

    let transitions = machine.expanded_transitions()?;
    let graph = build_graph(machine, &transitions);

    validate_initial_stage(&graph, machine)?;
    validate_paths(&graph, machine)?;
    validate_final_stages(&graph, machine)?;
    Ok(())
}

fn validate_initial_stage(
    graph: &DiGraphMap<u64, ()>,
    machine: &StateMachineDef,
) -> Result<(), ValidationError> {
    let initial = node_id(&machine.initial_stage);
    if graph
        .neighbors_directed(initial, Direction::Incoming)
        .next()
        .is_some()
    {
        return Err(ValidationError::InitialStageIsDestination(
            machine.initial_stage.clone(),
        ));
    }
    Ok(())
}

fn validate_paths(
    graph: &DiGraphMap<u64, ()>,
    machine: &StateMachineDef,
) -> Result<(), ValidationError> {
    let final_ids: Vec<u64> = machine.final_stages.iter().map(|s| node_id(s)).collect();
    for stage in &machine.stages {
        if machine.is_final(stage) {
            continue;
        }
        let mut dfs = Dfs::new(graph, node_id(stage));
        let mut reaches_final = false;
        while let Some(node) = dfs.next(graph) {
            if final_ids.contains(&node) {
                reaches_final = true;
                break;
            }
        }
        if !reaches_final {
            return Err(ValidationError::UnreachableFinalStage(stage.clone()));
        }
    }
    Ok(())
}

fn validate_final_stages(
    graph: &DiGraphMap<u64, ()>,
    machine: &StateMachineDef,
) -> Result<(), ValidationError> {
    for final_stage in &machine.final_stages {
        if graph
            .neighbors_directed(node_id(final_stage), Direction::Outgoing)
            .next()
            .is_some()
        {
            return Err(ValidationError::FinalStageIsSource(final_stage.clone()));
        }
    }
    Ok(())
}

fn build_graph(machine: &StateMachineDef, transitions: &[Transition]) -> DiGraphMap<u64, ()> {
    let mut graph = DiGraphMap::new();
    for stage in &machine.stages {
        graph.add_node(node_id(stage));
    }
    for transition in transitions {
        for from in &transition.from {
            for to in &transition.to {
                let (from_id, to_id) = (node_id(from), node_id(to));
                if from_id == to_id {
                    // Self-transitions go through a synthetic intermediate node
                    // so the graph never carries self-loop edges.
                    let intermediate = node_id(&format!("{from}_{to}"));
                    graph.add_node(intermediate);
                    graph.add_edge(from_id, intermediate, ());
                    graph.add_edge(intermediate, to_id, ());
                } else {
                    graph.add_edge(from_id, to_id, ());
                }
            }
        }
    }
    graph
}

/// FNV-1a over the stage name; gives every stage a stable integer node id.
fn node_id(stage: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    stage
        .bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}
