// Stagehand Library - state-machine driven workflow automation
// This exposes the core components for testing and integration

pub mod config;
pub mod engine;
pub mod instance;
pub mod sink;
pub mod state_machine;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{Settings, StageSpec, WorkflowDefinition, WorkflowSpec};
pub use engine::executor::{CommandExecutor, CommandFailure, ShellExecutor};
pub use engine::{Engine, EngineError};
pub use instance::{Execution, InstanceState, WorkflowInstance};
pub use sink::{ConsoleSink, OutputSink};
pub use state_machine::{
    validate_state_machine, FsmService, StateMachineDef, Transition, ValidationError, ORIGIN_STATE,
};
pub use store::{StoreError, WorkflowStore, DEFAULT_STORE_DIR};
pub use telemetry::init_telemetry;
