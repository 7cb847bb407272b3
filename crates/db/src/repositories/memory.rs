//! In-memory repository implementations for tests and ephemeral runs.

use std::collections::HashMap;

use tokio::sync::RwLock;

use outlay_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use outlay_core::domain::flow::{ApprovalFlow, FlowId};
use outlay_core::flows::ApprovalState;

use super::{
    ApprovalStateRepository, ExpenseRepository, FlowRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryFlowRepository {
    flows: RwLock<HashMap<String, ApprovalFlow>>,
}

impl InMemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_flows(flows: Vec<ApprovalFlow>) -> Self {
        let repo = Self::new();
        for flow in flows {
            repo.save(flow).await.expect("in-memory save is infallible");
        }
        repo
    }
}

#[async_trait::async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn find_active(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let mut flows: Vec<ApprovalFlow> =
            self.flows.read().await.values().filter(|flow| flow.is_active).cloned().collect();
        flows.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(flows)
    }

    async fn find_by_id(&self, id: &FlowId) -> Result<ApprovalFlow, RepositoryError> {
        self.flows.read().await.get(&id.0).cloned().ok_or_else(|| RepositoryError::NotFound {
            entity: "approval flow",
            id: id.0.clone(),
        })
    }

    async fn list_all(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let mut flows: Vec<ApprovalFlow> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(flows)
    }

    async fn save(&self, flow: ApprovalFlow) -> Result<(), RepositoryError> {
        self.flows.write().await.insert(flow.id.0.clone(), flow);
        Ok(())
    }

    async fn delete(&self, id: &FlowId) -> Result<(), RepositoryError> {
        match self.flows.write().await.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound { entity: "approval flow", id: id.0.clone() }),
        }
    }
}

#[derive(Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<HashMap<String, Expense>>,
}

impl InMemoryExpenseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        Ok(self.expenses.read().await.get(&id.0).cloned())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        self.expenses.write().await.insert(expense.id.0.clone(), expense);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ExpenseId,
        expected_version: i64,
        status: ExpenseStatus,
    ) -> Result<i64, RepositoryError> {
        let mut expenses = self.expenses.write().await;
        let expense = expenses.get_mut(&id.0).ok_or_else(|| RepositoryError::NotFound {
            entity: "expense",
            id: id.0.clone(),
        })?;

        if expense.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expense_id: id.0.clone(),
                expected_version,
            });
        }

        expense.status = status;
        expense.version += 1;
        expense.updated_at = chrono::Utc::now();
        Ok(expense.version)
    }

    async fn list_pending_matching(
        &self,
        vendor: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let mut matches: Vec<Expense> = self
            .expenses
            .read()
            .await
            .values()
            .filter(|expense| expense.status == ExpenseStatus::Pending)
            .filter(|expense| vendor.map_or(true, |v| expense.vendor.as_deref() == Some(v)))
            .filter(|expense| category.map_or(true, |c| expense.category.as_deref() == Some(c)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (a.created_at, &a.id.0).cmp(&(b.created_at, &b.id.0)));
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStateRepository {
    states: RwLock<HashMap<String, ApprovalState>>,
}

impl InMemoryApprovalStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ApprovalStateRepository for InMemoryApprovalStateRepository {
    async fn find_by_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalState>, RepositoryError> {
        Ok(self.states.read().await.get(&expense_id.0).cloned())
    }

    async fn save(&self, state: ApprovalState) -> Result<(), RepositoryError> {
        self.states.write().await.insert(state.expense_id.0.clone(), state);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalState>, RepositoryError> {
        // Without the expense table to join against, non-terminal machine
        // state is the pending signal.
        let mut pending: Vec<ApprovalState> = self
            .states
            .read()
            .await
            .values()
            .filter(|state| !state.machine_state().is_terminal())
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.created_at, &a.expense_id.0).cmp(&(b.created_at, &b.expense_id.0)));
        Ok(pending)
    }
}
