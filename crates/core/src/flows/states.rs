use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::flow::{ApprovalFlow, ApprovalLevel, FlowId};
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Derived lifecycle position of one expense's approval process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    AwaitingLevel(usize),
    Approved,
    Rejected,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDecision {
    pub level: usize,
    pub approver: UserId,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Per-expense approval bookkeeping. The flow's level structure is
/// snapshotted here at initiation; admin edits to the flow never alter an
/// in-flight state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalState {
    pub expense_id: ExpenseId,
    pub flow_id: Option<FlowId>,
    pub levels: Vec<ApprovalLevel>,
    pub current_level: usize,
    pub decisions: Vec<LevelDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalState {
    pub fn for_flow(expense_id: ExpenseId, flow: &ApprovalFlow, now: DateTime<Utc>) -> Self {
        Self {
            expense_id,
            flow_id: Some(flow.id.clone()),
            levels: flow.levels.clone(),
            current_level: 0,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn machine_state(&self) -> MachineState {
        if self.decisions.iter().any(|decision| decision.decision == Decision::Reject) {
            return MachineState::Rejected;
        }
        if self.current_level >= self.levels.len() {
            return MachineState::Approved;
        }
        MachineState::AwaitingLevel(self.current_level)
    }

    pub fn decisions_at(&self, level: usize) -> impl Iterator<Item = &LevelDecision> {
        self.decisions.iter().filter(move |decision| decision.level == level)
    }

    pub fn has_decided(&self, level: usize, approver: &UserId) -> bool {
        self.decisions_at(level).any(|decision| &decision.approver == approver)
    }

    /// The retained reason once a rejection ended the flow.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.decisions
            .iter()
            .find(|decision| decision.decision == Decision::Reject)
            .and_then(|decision| decision.comments.as_deref())
    }

    pub fn current_level_approvers(&self) -> &[UserId] {
        self.levels
            .get(self.current_level)
            .map(|level| level.approvers.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: MachineState,
    pub to: MachineState,
    pub decision: Decision,
    pub approver: UserId,
    pub terminal: bool,
}
