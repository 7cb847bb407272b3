//! Approval orchestration: flow selection at initiation, decision handling,
//! approver work queues, and the marketplace fast path. Persistence and the
//! pure state machine live in the `outlay-db` and `outlay-core` crates.

pub mod hooks;
pub mod locks;
pub mod service;

pub use hooks::{HookError, NoopTerminalHook, RecordingTerminalHook, TerminalHook};
pub use locks::ExpenseLockMap;
pub use service::{
    ApprovalService, AutoApproveReport, DecisionReceipt, InitiationOutcome, PendingApproval,
    ServiceError,
};
