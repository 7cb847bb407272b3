use chrono::{DateTime, Utc};
use sqlx::Row;

use outlay_core::domain::expense::ExpenseId;
use outlay_core::domain::flow::{ApprovalLevel, FlowId};
use outlay_core::flows::{ApprovalState, LevelDecision};

use super::{ApprovalStateRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalStateRepository {
    pool: DbPool,
}

impl SqlApprovalStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const STATE_COLUMNS: &str =
    "expense_id, flow_id, levels, current_level, decisions, created_at, updated_at";

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalState, RepositoryError> {
    let expense_id: String =
        row.try_get("expense_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let flow_id: Option<String> =
        row.try_get("flow_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let levels_json: String =
        row.try_get("levels").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_level: i64 =
        row.try_get("current_level").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decisions_json: String =
        row.try_get("decisions").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let levels: Vec<ApprovalLevel> = serde_json::from_str(&levels_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid levels JSON: {error}")))?;
    let decisions: Vec<LevelDecision> = serde_json::from_str(&decisions_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid decisions JSON: {error}")))?;

    Ok(ApprovalState {
        expense_id: ExpenseId(expense_id),
        flow_id: flow_id.map(FlowId),
        levels,
        current_level: usize::try_from(current_level)
            .map_err(|_| RepositoryError::Decode(format!("negative level {current_level}")))?,
        decisions,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl ApprovalStateRepository for SqlApprovalStateRepository {
    async fn find_by_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Option<ApprovalState>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM approval_state WHERE expense_id = ?1"
        ))
        .bind(&expense_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn save(&self, state: ApprovalState) -> Result<(), RepositoryError> {
        let levels_json = serde_json::to_string(&state.levels)
            .map_err(|error| RepositoryError::Decode(format!("levels encode failed: {error}")))?;
        let decisions_json = serde_json::to_string(&state.decisions).map_err(|error| {
            RepositoryError::Decode(format!("decisions encode failed: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO approval_state (expense_id, flow_id, levels, current_level, decisions,
                                         created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(expense_id) DO UPDATE SET
                 flow_id = excluded.flow_id,
                 levels = excluded.levels,
                 current_level = excluded.current_level,
                 decisions = excluded.decisions,
                 updated_at = excluded.updated_at",
        )
        .bind(&state.expense_id.0)
        .bind(state.flow_id.as_ref().map(|id| id.0.clone()))
        .bind(levels_json)
        .bind(state.current_level as i64)
        .bind(decisions_json)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalState>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT s.expense_id, s.flow_id, s.levels, s.current_level, s.decisions,
                    s.created_at, s.updated_at
             FROM approval_state s
             JOIN expense e ON e.id = s.expense_id
             WHERE e.status = 'pending'
             ORDER BY s.created_at ASC, s.expense_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_state).collect()
    }
}
