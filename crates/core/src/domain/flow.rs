use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expense::CostCenterId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// How a level counts as satisfied. Current admin tooling only produces
/// `AnyOne` ("all approvers at a level can approve expenses independently");
/// `AllRequired` is implemented so the satisfaction policy stays a tagged
/// variant rather than an implicit assumption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelPolicy {
    #[default]
    AnyOne,
    AllRequired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub approvers: Vec<UserId>,
    #[serde(default)]
    pub policy: LevelPolicy,
}

impl ApprovalLevel {
    pub fn any_one(approvers: Vec<UserId>) -> Self {
        Self { approvers, policy: LevelPolicy::AnyOne }
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.approvers.iter().any(|approver| approver == user)
    }
}

/// Configured approval rule: an amount band plus optional cost-center scope
/// mapped to an ordered chain of approval levels. Owned by the admin
/// configuration surface; the engine only reads active flows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub name: String,
    pub description: String,
    pub min_amount: Decimal,
    /// `None` means the band is unbounded above.
    pub max_amount: Option<Decimal>,
    /// `None` means the flow applies org-wide.
    pub cost_center_id: Option<CostCenterId>,
    pub is_active: bool,
    pub levels: Vec<ApprovalLevel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowValidationError {
    #[error("flow `{flow_id}` has no approval levels")]
    NoLevels { flow_id: String },
    #[error("flow `{flow_id}` level {level} has no approvers")]
    EmptyLevel { flow_id: String, level: usize },
    #[error("flow `{flow_id}` level {level} lists approver `{approver}` more than once")]
    DuplicateApprover { flow_id: String, level: usize, approver: String },
    #[error("flow `{flow_id}` amount band is inverted: min {min_amount} >= max {max_amount}")]
    InvertedAmountBand { flow_id: String, min_amount: Decimal, max_amount: Decimal },
    #[error("flow `{flow_id}` min amount {min_amount} is negative")]
    NegativeMinAmount { flow_id: String, min_amount: Decimal },
}

impl ApprovalFlow {
    pub fn validate(&self) -> Result<(), FlowValidationError> {
        let flow_id = self.id.0.clone();

        if self.min_amount < Decimal::ZERO {
            return Err(FlowValidationError::NegativeMinAmount {
                flow_id,
                min_amount: self.min_amount,
            });
        }

        if let Some(max_amount) = self.max_amount {
            if self.min_amount >= max_amount {
                return Err(FlowValidationError::InvertedAmountBand {
                    flow_id,
                    min_amount: self.min_amount,
                    max_amount,
                });
            }
        }

        if self.levels.is_empty() {
            return Err(FlowValidationError::NoLevels { flow_id });
        }

        for (level, approvers) in self.levels.iter().enumerate() {
            if approvers.approvers.is_empty() {
                return Err(FlowValidationError::EmptyLevel { flow_id, level });
            }

            let mut seen = HashSet::new();
            for approver in &approvers.approvers {
                if !seen.insert(approver) {
                    return Err(FlowValidationError::DuplicateApprover {
                        flow_id,
                        level,
                        approver: approver.0.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn matches_amount(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }

    pub fn matches_cost_center(&self, cost_center_id: CostCenterId) -> bool {
        match self.cost_center_id {
            Some(scoped) => scoped == cost_center_id,
            None => true,
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.cost_center_id.is_some()
    }

    /// Width of the amount band; `None` means unbounded, which sorts as
    /// infinitely wide during ambiguity resolution.
    pub fn band_width(&self) -> Option<Decimal> {
        self.max_amount.map(|max| max - self.min_amount)
    }
}
