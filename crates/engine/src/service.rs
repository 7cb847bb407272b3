use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use outlay_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use outlay_core::config::ApprovalsConfig;
use outlay_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use outlay_core::domain::flow::FlowId;
use outlay_core::domain::user::UserId;
use outlay_core::errors::{ApplicationError, DomainError};
use outlay_core::flows::{
    ApprovalState, ApprovalStateMachine, Decision, DecisionError, MachineState, TransitionOutcome,
};
use outlay_core::selector::select_flow;
use outlay_db::repositories::{
    ApprovalStateRepository, ExpenseRepository, FlowRepository, RepositoryError,
};

use crate::hooks::TerminalHook;
use crate::locks::ExpenseLockMap;

#[derive(Clone, Debug, Error)]
pub enum ServiceError {
    #[error("expense `{0}` was not found")]
    ExpenseNotFound(String),
    #[error("expense `{expense_id}` is `{status:?}`, not pending")]
    ExpenseNotPending { expense_id: String, status: ExpenseStatus },
    #[error("approval was already initiated for expense `{0}`")]
    AlreadyInitiated(String),
    #[error("no approval process was initiated for expense `{0}`")]
    ApprovalNotInitiated(String),
    #[error("no approval flow matches expense `{0}` and bypass is disabled")]
    NoMatchingFlow(String),
    #[error("marketplace auto-approval requires a configured approver identity")]
    MarketplaceApproverUnset,
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("persistence failure: {0}")]
    Repository(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value.to_string())
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Decision(error) => Self::Domain(DomainError::Decision(error)),
            ServiceError::Repository(message) => Self::Persistence(message),
            ServiceError::NoMatchingFlow(_) | ServiceError::MarketplaceApproverUnset => {
                Self::Configuration(value.to_string())
            }
            other => Self::Domain(DomainError::InvariantViolation(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// A flow matched; the first level is now awaiting decisions.
    Started { flow_id: FlowId, level_count: usize },
    /// No flow matched and the bypass is on: approved without review.
    Bypassed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionReceipt {
    pub outcome: TransitionOutcome,
    pub new_status: ExpenseStatus,
    pub new_version: i64,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingApproval {
    pub expense: Expense,
    pub flow_id: Option<FlowId>,
    pub level: usize,
}

#[derive(Debug, Default)]
pub struct AutoApproveReport {
    pub approved: Vec<ExpenseId>,
    pub skipped: Vec<(ExpenseId, String)>,
    pub failed: Vec<(ExpenseId, String)>,
}

/// Orchestrates the approval lifecycle of expenses: initiation (flow
/// selection and level snapshot), decision handling, approver work queues,
/// and the marketplace fast path.
///
/// All writes on one expense are serialized through [`ExpenseLockMap`], and
/// the terminal status is written before the terminal hook fires, so the
/// hook observes only durable outcomes and fires at most once per expense.
pub struct ApprovalService {
    flows: Arc<dyn FlowRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    states: Arc<dyn ApprovalStateRepository>,
    machine: ApprovalStateMachine,
    audit: Arc<dyn AuditSink>,
    hook: Arc<dyn TerminalHook>,
    config: ApprovalsConfig,
    locks: ExpenseLockMap,
}

impl ApprovalService {
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        expenses: Arc<dyn ExpenseRepository>,
        states: Arc<dyn ApprovalStateRepository>,
        audit: Arc<dyn AuditSink>,
        hook: Arc<dyn TerminalHook>,
        config: ApprovalsConfig,
    ) -> Self {
        Self {
            flows,
            expenses,
            states,
            machine: ApprovalStateMachine,
            audit,
            hook,
            config,
            locks: ExpenseLockMap::new(),
        }
    }

    /// Starts the approval process for a pending expense. The matched flow's
    /// level structure is snapshotted into the approval state; later edits
    /// to the flow do not touch in-flight approvals.
    pub async fn initiate_approval(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<InitiationOutcome, ServiceError> {
        let _guard = self.locks.acquire(expense_id).await;
        let correlation_id = Uuid::new_v4().to_string();

        let expense = self
            .expenses
            .find_by_id(expense_id)
            .await?
            .ok_or_else(|| ServiceError::ExpenseNotFound(expense_id.0.clone()))?;
        if expense.status != ExpenseStatus::Pending {
            return Err(ServiceError::ExpenseNotPending {
                expense_id: expense_id.0.clone(),
                status: expense.status,
            });
        }
        if self.states.find_by_expense(expense_id).await?.is_some() {
            return Err(ServiceError::AlreadyInitiated(expense_id.0.clone()));
        }

        let flows = self.flows.find_active().await?;
        let now = Utc::now();

        match select_flow(&flows, expense.amount, expense.cost_center_id) {
            Some(flow) => {
                let state = ApprovalState::for_flow(expense.id.clone(), flow, now);
                self.states.save(state).await?;

                let audit = AuditContext::new(
                    Some(expense.id.clone()),
                    correlation_id,
                    expense.submitted_by.as_str(),
                );
                self.audit.emit(
                    audit
                        .event("approval.initiated", AuditCategory::Selection, AuditOutcome::Success)
                        .with_metadata("flow_id", flow.id.0.clone())
                        .with_metadata("level_count", flow.levels.len().to_string())
                        .with_metadata("amount", expense.amount.to_string()),
                );

                Ok(InitiationOutcome::Started {
                    flow_id: flow.id.clone(),
                    level_count: flow.levels.len(),
                })
            }
            None if self.config.bypass_on_no_flow => {
                // No levels means the state is born approved; the bypass is
                // still written down like any other outcome.
                let state = ApprovalState {
                    expense_id: expense.id.clone(),
                    flow_id: None,
                    levels: Vec::new(),
                    current_level: 0,
                    decisions: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                self.states.save(state.clone()).await?;
                let new_version = self
                    .expenses
                    .update_status(expense_id, expense.version, ExpenseStatus::Approved)
                    .await?;

                let audit =
                    AuditContext::new(Some(expense.id.clone()), correlation_id, "approval-engine");
                self.audit.emit(
                    audit
                        .event("approval.bypassed", AuditCategory::Selection, AuditOutcome::Success)
                        .with_metadata("amount", expense.amount.to_string())
                        .with_metadata("reason", "no matching flow"),
                );

                let mut approved = expense;
                approved.status = ExpenseStatus::Approved;
                approved.version = new_version;
                self.dispatch_hook(&approved, &state).await;

                Ok(InitiationOutcome::Bypassed)
            }
            None => {
                let audit =
                    AuditContext::new(Some(expense.id.clone()), correlation_id, "approval-engine");
                self.audit.emit(
                    audit
                        .event(
                            "approval.no_flow_matched",
                            AuditCategory::Selection,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("amount", expense.amount.to_string()),
                );
                Err(ServiceError::NoMatchingFlow(expense_id.0.clone()))
            }
        }
    }

    /// Applies one approver decision. When the decision ends the process,
    /// the expense status is persisted before the terminal hook runs.
    pub async fn submit_decision(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<DecisionReceipt, ServiceError> {
        let _guard = self.locks.acquire(expense_id).await;
        let correlation_id = Uuid::new_v4().to_string();

        let expense = self
            .expenses
            .find_by_id(expense_id)
            .await?
            .ok_or_else(|| ServiceError::ExpenseNotFound(expense_id.0.clone()))?;
        let mut state = self
            .states
            .find_by_expense(expense_id)
            .await?
            .ok_or_else(|| ServiceError::ApprovalNotInitiated(expense_id.0.clone()))?;

        let audit_context =
            AuditContext::new(Some(expense.id.clone()), correlation_id.clone(), approver.as_str());
        let outcome = self.machine.record_decision_with_audit(
            &mut state,
            approver,
            decision,
            comments,
            Utc::now(),
            self.audit.as_ref(),
            &audit_context,
        )?;

        self.states.save(state.clone()).await?;

        let mut new_status = expense.status;
        let mut new_version = expense.version;
        if outcome.terminal {
            let status = match outcome.to {
                MachineState::Approved => ExpenseStatus::Approved,
                MachineState::Rejected => ExpenseStatus::Rejected,
                MachineState::AwaitingLevel(_) => {
                    unreachable!("terminal outcome cannot await a level")
                }
            };
            new_version = self.expenses.update_status(expense_id, expense.version, status).await?;
            new_status = status;

            let mut finished = expense;
            finished.status = status;
            finished.version = new_version;
            self.dispatch_hook(&finished, &state).await;
        }

        Ok(DecisionReceipt { outcome, new_status, new_version, correlation_id })
    }

    /// Expenses currently awaiting a decision from `approver`: the approver
    /// sits at the active level and has not voted there yet.
    pub async fn pending_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<PendingApproval>, ServiceError> {
        let mut queue = Vec::new();
        for state in self.states.list_pending().await? {
            if state.machine_state().is_terminal() {
                continue;
            }
            if !state.current_level_approvers().contains(approver) {
                continue;
            }
            if state.has_decided(state.current_level, approver) {
                continue;
            }
            let Some(expense) = self.expenses.find_by_id(&state.expense_id).await? else {
                continue;
            };
            if expense.status != ExpenseStatus::Pending {
                continue;
            }
            queue.push(PendingApproval {
                expense,
                flow_id: state.flow_id.clone(),
                level: state.current_level,
            });
        }
        Ok(queue)
    }

    /// Marketplace fast path: drives every pending expense matching the
    /// vendor/category filter to approval, acting as the configured
    /// marketplace approver. Expenses where that identity cannot vote at
    /// the active level are skipped, never forced.
    pub async fn auto_approve_matching(
        &self,
        vendor: Option<&str>,
        category: Option<&str>,
    ) -> Result<AutoApproveReport, ServiceError> {
        let approver = self
            .config
            .marketplace_approver
            .clone()
            .map(UserId)
            .ok_or(ServiceError::MarketplaceApproverUnset)?;

        let mut report = AutoApproveReport::default();
        for expense in self.expenses.list_pending_matching(vendor, category).await? {
            match self.drive_to_approval(&expense.id, &approver).await {
                Ok(DriveResult::Approved) => report.approved.push(expense.id),
                Ok(DriveResult::Blocked(reason)) => report.skipped.push((expense.id, reason)),
                Err(error) => report.failed.push((expense.id, error.to_string())),
            }
        }

        tracing::info!(
            approved = report.approved.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "marketplace auto-approval pass finished",
        );
        Ok(report)
    }

    async fn drive_to_approval(
        &self,
        expense_id: &ExpenseId,
        approver: &UserId,
    ) -> Result<DriveResult, ServiceError> {
        // Each successful vote advances at most one level, so the level
        // count bounds the loop.
        let level_bound = match self.states.find_by_expense(expense_id).await? {
            Some(state) => state.levels.len().max(1),
            None => return Ok(DriveResult::Blocked("approval not initiated".to_string())),
        };

        for _ in 0..level_bound {
            let receipt = match self
                .submit_decision(
                    expense_id,
                    approver,
                    Decision::Approve,
                    Some("marketplace auto-approval".to_string()),
                )
                .await
            {
                Ok(receipt) => receipt,
                Err(ServiceError::Decision(
                    error @ (DecisionError::UnauthorizedApprover { .. }
                    | DecisionError::DuplicateDecision { .. }),
                )) => return Ok(DriveResult::Blocked(error.to_string())),
                Err(other) => return Err(other),
            };
            if receipt.outcome.terminal {
                return Ok(DriveResult::Approved);
            }
        }

        Ok(DriveResult::Blocked("approval did not reach a terminal state".to_string()))
    }

    async fn dispatch_hook(&self, expense: &Expense, state: &ApprovalState) {
        if let Err(error) = self.hook.on_terminal(expense, state).await {
            tracing::warn!(
                expense_id = %expense.id.0,
                %error,
                "terminal hook failed; decision stands",
            );
        }
    }
}

enum DriveResult {
    Approved,
    Blocked(String),
}
