use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use outlay_core::domain::expense::{Expense, ExpenseStatus};
use outlay_core::flows::ApprovalState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("terminal hook failed: {0}")]
pub struct HookError(pub String);

/// Invoked exactly once per expense, after its terminal status is durably
/// written. Failures are logged by the caller and never roll the decision
/// back.
#[async_trait]
pub trait TerminalHook: Send + Sync {
    async fn on_terminal(&self, expense: &Expense, state: &ApprovalState) -> Result<(), HookError>;
}

pub struct NoopTerminalHook;

#[async_trait]
impl TerminalHook for NoopTerminalHook {
    async fn on_terminal(
        &self,
        _expense: &Expense,
        _state: &ApprovalState,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Test double that records every dispatch.
#[derive(Default)]
pub struct RecordingTerminalHook {
    calls: Mutex<Vec<(String, ExpenseStatus)>>,
    fail: bool,
}

impl RecordingTerminalHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { calls: Mutex::new(Vec::new()), fail: true }
    }

    pub fn calls(&self) -> Vec<(String, ExpenseStatus)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TerminalHook for RecordingTerminalHook {
    async fn on_terminal(&self, expense: &Expense, _state: &ApprovalState) -> Result<(), HookError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((expense.id.0.clone(), expense.status)),
            Err(poisoned) => poisoned.into_inner().push((expense.id.0.clone(), expense.status)),
        }
        if self.fail {
            return Err(HookError("simulated downstream outage".to_string()));
        }
        Ok(())
    }
}
