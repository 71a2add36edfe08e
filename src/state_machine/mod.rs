// State machine support: definition model, graph validation, runtime queries.

pub mod model;
pub mod runtime;
pub mod validator;

pub use self::model::{expand_stages, ModelError, StateMachineDef, Transition};
pub use self::runtime::{FsmError, FsmService, ORIGIN_STATE};
pub use self::validator::{validate_state_machine, ValidationError};
