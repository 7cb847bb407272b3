use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use outlay_core::domain::expense::{CostCenterId, Expense, ExpenseId, ExpenseStatus};
use outlay_core::domain::user::UserId;

use super::{ExpenseRepository, RepositoryError};
use crate::DbPool;

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const EXPENSE_COLUMNS: &str = "id, amount, cost_center_id, submitted_by, vendor, category,
                               status, version, created_at, updated_at";

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_expense(row: &sqlx::sqlite::SqliteRow) -> Result<Expense, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let amount_str: String =
        row.try_get("amount").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let cost_center_id: i64 =
        row.try_get("cost_center_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let submitted_by: String =
        row.try_get("submitted_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let vendor: Option<String> =
        row.try_get("vendor").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let category: Option<String> =
        row.try_get("category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let amount = Decimal::from_str(&amount_str).map_err(|error| {
        RepositoryError::Decode(format!("invalid amount `{amount_str}`: {error}"))
    })?;
    let status = ExpenseStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status_str}`")))?;

    Ok(Expense {
        id: ExpenseId(id),
        amount,
        cost_center_id: CostCenterId(cost_center_id),
        submitted_by: UserId(submitted_by),
        vendor,
        category,
        status,
        version,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_expense).transpose()
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO expense (id, amount, cost_center_id, submitted_by, vendor, category,
                                  status, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 amount = excluded.amount,
                 cost_center_id = excluded.cost_center_id,
                 submitted_by = excluded.submitted_by,
                 vendor = excluded.vendor,
                 category = excluded.category,
                 status = excluded.status,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(&expense.id.0)
        .bind(expense.amount.to_string())
        .bind(expense.cost_center_id.0)
        .bind(expense.submitted_by.as_str())
        .bind(&expense.vendor)
        .bind(&expense.category)
        .bind(expense.status.as_str())
        .bind(expense.version)
        .bind(expense.created_at.to_rfc3339())
        .bind(expense.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: &ExpenseId,
        expected_version: i64,
        status: ExpenseStatus,
    ) -> Result<i64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE expense
             SET status = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the row is missing or someone else bumped the version.
            let exists = sqlx::query("SELECT 1 AS present FROM expense WHERE id = ?1")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?
                .is_some();

            if exists {
                return Err(RepositoryError::VersionConflict {
                    expense_id: id.0.clone(),
                    expected_version,
                });
            }
            return Err(RepositoryError::NotFound { entity: "expense", id: id.0.clone() });
        }

        Ok(expected_version + 1)
    }

    async fn list_pending_matching(
        &self,
        vendor: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let mut sql = format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE status = 'pending'");
        if vendor.is_some() {
            sql.push_str(" AND vendor = ?1");
        }
        if category.is_some() {
            sql.push_str(if vendor.is_some() { " AND category = ?2" } else { " AND category = ?1" });
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(vendor) = vendor {
            query = query.bind(vendor);
        }
        if let Some(category) = category {
            query = query.bind(category);
        }

        let rows: Vec<sqlx::sqlite::SqliteRow> = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_expense).collect()
    }
}
