use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use outlay_core::domain::expense::CostCenterId;
use outlay_core::domain::flow::{ApprovalFlow, ApprovalLevel, FlowId};

use super::{FlowRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowRepository {
    pool: DbPool,
}

impl SqlFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const FLOW_COLUMNS: &str = "id, name, description, min_amount, max_amount, cost_center_id,
                            is_active, levels, created_at, updated_at";

fn parse_amount(raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid amount `{raw}`: {error}")))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let min_amount_str: String =
        row.try_get("min_amount").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let max_amount_str: Option<String> =
        row.try_get("max_amount").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let cost_center_id: Option<i64> =
        row.try_get("cost_center_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: bool =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let levels_json: String =
        row.try_get("levels").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let levels: Vec<ApprovalLevel> = serde_json::from_str(&levels_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid levels JSON: {error}")))?;
    let max_amount = max_amount_str.as_deref().map(parse_amount).transpose()?;

    Ok(ApprovalFlow {
        id: FlowId(id),
        name,
        description,
        min_amount: parse_amount(&min_amount_str)?,
        max_amount,
        cost_center_id: cost_center_id.map(CostCenterId),
        is_active,
        levels,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl FlowRepository for SqlFlowRepository {
    async fn find_active(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flow WHERE is_active = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow).collect()
    }

    async fn find_by_id(&self, id: &FlowId) -> Result<ApprovalFlow, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {FLOW_COLUMNS} FROM approval_flow WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => row_to_flow(row),
            None => {
                Err(RepositoryError::NotFound { entity: "approval flow", id: id.0.clone() })
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<ApprovalFlow>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> =
            sqlx::query(&format!("SELECT {FLOW_COLUMNS} FROM approval_flow ORDER BY id ASC"))
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_flow).collect()
    }

    async fn save(&self, flow: ApprovalFlow) -> Result<(), RepositoryError> {
        let levels_json = serde_json::to_string(&flow.levels)
            .map_err(|error| RepositoryError::Decode(format!("levels encode failed: {error}")))?;

        sqlx::query(
            "INSERT INTO approval_flow (id, name, description, min_amount, max_amount,
                                        cost_center_id, is_active, levels, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 cost_center_id = excluded.cost_center_id,
                 is_active = excluded.is_active,
                 levels = excluded.levels,
                 updated_at = excluded.updated_at",
        )
        .bind(&flow.id.0)
        .bind(&flow.name)
        .bind(&flow.description)
        .bind(flow.min_amount.to_string())
        .bind(flow.max_amount.map(|amount| amount.to_string()))
        .bind(flow.cost_center_id.map(|cc| cc.0))
        .bind(flow.is_active)
        .bind(levels_json)
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &FlowId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM approval_flow WHERE id = ?1")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "approval flow", id: id.0.clone() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use outlay_core::domain::expense::CostCenterId;
    use outlay_core::domain::flow::{ApprovalFlow, ApprovalLevel, FlowId, LevelPolicy};
    use outlay_core::domain::user::UserId;

    use super::SqlFlowRepository;
    use crate::repositories::{FlowRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_flow(id: &str, active: bool) -> ApprovalFlow {
        let now = Utc::now();
        ApprovalFlow {
            id: FlowId(id.to_string()),
            name: "Engineering default".to_string(),
            description: "Manager, then finance".to_string(),
            min_amount: Decimal::new(50_000, 2),
            max_amount: Some(Decimal::new(250_000, 2)),
            cost_center_id: Some(CostCenterId(10)),
            is_active: active,
            levels: vec![
                ApprovalLevel::any_one(vec![UserId::from("u-mgr-1"), UserId::from("u-mgr-2")]),
                ApprovalLevel {
                    approvers: vec![UserId::from("u-finance")],
                    policy: LevelPolicy::AnyOne,
                },
            ],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_by_id_round_trips_levels() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);
        let flow = sample_flow("flow-001", true);

        repo.save(flow.clone()).await.expect("save");
        let found = repo.find_by_id(&FlowId("flow-001".to_string())).await.expect("find");

        assert_eq!(found.id, flow.id);
        assert_eq!(found.levels, flow.levels);
        assert_eq!(found.min_amount, flow.min_amount);
        assert_eq!(found.max_amount, flow.max_amount);
        assert_eq!(found.cost_center_id, Some(CostCenterId(10)));
    }

    #[tokio::test]
    async fn find_by_id_miss_is_not_found() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        let error =
            repo.find_by_id(&FlowId("flow-missing".to_string())).await.expect_err("miss");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn find_active_excludes_inactive_flows() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        repo.save(sample_flow("flow-001", true)).await.expect("save active");
        repo.save(sample_flow("flow-002", false)).await.expect("save inactive");

        let active = repo.find_active().await.expect("find active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.0, "flow-001");

        let all = repo.list_all().await.expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn save_upserts_on_conflict() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        let flow = sample_flow("flow-001", true);
        repo.save(flow.clone()).await.expect("save");

        let mut updated = flow;
        updated.is_active = false;
        updated.max_amount = None;
        updated.updated_at = Utc::now();
        repo.save(updated).await.expect("upsert");

        let found = repo.find_by_id(&FlowId("flow-001".to_string())).await.expect("find");
        assert!(!found.is_active);
        assert_eq!(found.max_amount, None);
    }

    #[tokio::test]
    async fn delete_removes_flow_and_reports_misses() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        repo.save(sample_flow("flow-001", true)).await.expect("save");
        repo.delete(&FlowId("flow-001".to_string())).await.expect("delete");

        let error = repo.delete(&FlowId("flow-001".to_string())).await.expect_err("gone");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }
}
