pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod selector;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::expense::{CostCenterId, Expense, ExpenseId, ExpenseStatus};
pub use domain::flow::{ApprovalFlow, ApprovalLevel, FlowId, FlowValidationError, LevelPolicy};
pub use domain::user::UserId;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    ApprovalState, ApprovalStateMachine, Decision, DecisionError, LevelDecision, MachineState,
    TransitionOutcome,
};
pub use selector::select_flow;
