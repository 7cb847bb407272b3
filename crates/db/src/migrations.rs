use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR, DbPool};

    const BASELINE_OBJECTS: &[&str] = &[
        "approval_flow",
        "expense",
        "approval_state",
        "idx_approval_flow_is_active",
        "idx_approval_flow_cost_center_id",
        "idx_expense_status",
        "idx_expense_vendor",
        "idx_expense_submitted_by",
        "idx_approval_state_flow_id",
    ];

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect")
    }

    /// Name and DDL of every migration-managed object, ordered by name.
    /// Excludes sqlite internals and the sqlx bookkeeping table.
    async fn schema_snapshot(pool: &DbPool) -> Vec<(String, String)> {
        sqlx::query_as::<_, (String, String)>(
            "SELECT name, IFNULL(sql, '') FROM sqlite_master \
             WHERE type IN ('table', 'index') \
               AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
             ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
    }

    #[tokio::test]
    async fn baseline_migration_creates_every_managed_object() {
        let pool = pool().await;
        run_pending(&pool).await.expect("run migrations");

        let names: Vec<String> =
            schema_snapshot(&pool).await.into_iter().map(|(name, _)| name).collect();
        for object in BASELINE_OBJECTS {
            assert!(names.iter().any(|name| name == object), "`{object}` missing after migrations");
        }
    }

    #[tokio::test]
    async fn full_undo_drops_the_managed_schema() {
        let pool = pool().await;
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert!(
            schema_snapshot(&pool).await.is_empty(),
            "undo should leave no managed schema objects behind"
        );
    }

    #[tokio::test]
    async fn up_down_up_round_trips_the_schema() {
        let pool = pool().await;
        run_pending(&pool).await.expect("run migrations");
        let first = schema_snapshot(&pool).await;
        assert_eq!(first.len(), BASELINE_OBJECTS.len());

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        run_pending(&pool).await.expect("re-run migrations");

        assert_eq!(schema_snapshot(&pool).await, first, "schema should survive an up/down/up walk");
    }
}
