use async_trait::async_trait;
use thiserror::Error;

use outlay_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use outlay_core::domain::flow::{ApprovalFlow, FlowId};
use outlay_core::flows::ApprovalState;

pub mod expense;
pub mod flow;
pub mod memory;
pub mod state;

pub use expense::SqlExpenseRepository;
pub use flow::SqlFlowRepository;
pub use memory::{InMemoryApprovalStateRepository, InMemoryExpenseRepository, InMemoryFlowRepository};
pub use state::SqlApprovalStateRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("expense `{expense_id}` was modified concurrently (expected version {expected_version})")]
    VersionConflict { expense_id: String, expected_version: i64 },
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn find_active(&self) -> Result<Vec<ApprovalFlow>, RepositoryError>;
    async fn find_by_id(&self, id: &FlowId) -> Result<ApprovalFlow, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<ApprovalFlow>, RepositoryError>;
    async fn save(&self, flow: ApprovalFlow) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &FlowId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    async fn save(&self, expense: Expense) -> Result<(), RepositoryError>;

    /// Compare-and-swap status write. Succeeds only when the stored version
    /// still equals `expected_version`; returns the new version.
    async fn update_status(
        &self,
        id: &ExpenseId,
        expected_version: i64,
        status: ExpenseStatus,
    ) -> Result<i64, RepositoryError>;

    async fn list_pending_matching(
        &self,
        vendor: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Expense>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalStateRepository: Send + Sync {
    async fn find_by_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalState>, RepositoryError>;
    async fn save(&self, state: ApprovalState) -> Result<(), RepositoryError>;

    /// States whose expense is still `pending`, for approver work queues.
    async fn list_pending(&self) -> Result<Vec<ApprovalState>, RepositoryError>;
}
