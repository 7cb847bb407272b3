pub mod engine;
pub mod states;

pub use engine::{ApprovalStateMachine, DecisionError};
pub use states::{ApprovalState, Decision, LevelDecision, MachineState, TransitionOutcome};
