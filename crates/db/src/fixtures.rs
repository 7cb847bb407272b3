use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical seed contract: one flow per selection band plus expenses in
/// each lifecycle position.
const SEED_FLOWS: &[SeedFlowContract] = &[
    SeedFlowContract {
        flow_id: "flow-small",
        level_count: 1,
        cost_center_scoped: false,
        description: "Single manager sign-off, company-wide",
    },
    SeedFlowContract {
        flow_id: "flow-engineering",
        level_count: 2,
        cost_center_scoped: true,
        description: "Manager then finance, engineering only",
    },
    SeedFlowContract {
        flow_id: "flow-large",
        level_count: 3,
        cost_center_scoped: false,
        description: "Manager, finance, then the CFO",
    },
];

const SEED_EXPENSES: &[SeedExpenseContract] = &[
    SeedExpenseContract { expense_id: "EXP-seed-001", status: "pending", decision_count: 0 },
    SeedExpenseContract { expense_id: "EXP-seed-002", status: "pending", decision_count: 1 },
    SeedExpenseContract { expense_id: "EXP-seed-003", status: "approved", decision_count: 1 },
];

/// Deterministic seed dataset for local runs and end-to-end checks.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    /// Load the seed dataset. Idempotent: reloading replaces the same rows.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            flows_seeded: SEED_FLOWS
                .iter()
                .map(|flow| (flow.flow_id, flow.description))
                .collect(),
            expenses_seeded: SEED_EXPENSES.len(),
        })
    }

    /// Verify the seeded rows against the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for flow in SEED_FLOWS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_flow WHERE id = ?1 AND is_active = 1)",
            )
            .bind(flow.flow_id)
            .fetch_one(pool)
            .await?;
            checks.push((flow.flow_id, exists == 1));

            let level_count: i64 = sqlx::query_scalar(
                "SELECT json_array_length(levels) FROM approval_flow WHERE id = ?1",
            )
            .bind(flow.flow_id)
            .fetch_one(pool)
            .await?;
            checks.push((flow.level_count_label(), level_count == flow.level_count));

            let scoped: i64 = sqlx::query_scalar(
                "SELECT cost_center_id IS NOT NULL FROM approval_flow WHERE id = ?1",
            )
            .bind(flow.flow_id)
            .fetch_one(pool)
            .await?;
            checks.push((flow.scope_label(), (scoped == 1) == flow.cost_center_scoped));
        }

        for expense in SEED_EXPENSES {
            let status_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM expense WHERE id = ?1 AND status = ?2)",
            )
            .bind(expense.expense_id)
            .bind(expense.status)
            .fetch_one(pool)
            .await?;
            checks.push((expense.expense_id, status_ok == 1));

            let decision_count: i64 = sqlx::query_scalar(
                "SELECT json_array_length(decisions) FROM approval_state WHERE expense_id = ?1",
            )
            .bind(expense.expense_id)
            .fetch_one(pool)
            .await?;
            checks.push((expense.decision_label(), decision_count == expense.decision_count));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let expense_ids = sql_array_from_ids(
            &SEED_EXPENSES.iter().map(|e| e.expense_id).collect::<Vec<_>>(),
        );
        let flow_ids =
            sql_array_from_ids(&SEED_FLOWS.iter().map(|f| f.flow_id).collect::<Vec<_>>());

        sqlx::query(&format!("DELETE FROM approval_state WHERE expense_id IN {expense_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM expense WHERE id IN {expense_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM approval_flow WHERE id IN {flow_ids}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedFlowContract {
    flow_id: &'static str,
    level_count: i64,
    cost_center_scoped: bool,
    description: &'static str,
}

impl SeedFlowContract {
    fn level_count_label(&self) -> &'static str {
        match self.flow_id {
            "flow-small" => "flow-small-level-count",
            "flow-engineering" => "flow-engineering-level-count",
            _ => "flow-large-level-count",
        }
    }

    fn scope_label(&self) -> &'static str {
        match self.flow_id {
            "flow-small" => "flow-small-scope",
            "flow-engineering" => "flow-engineering-scope",
            _ => "flow-large-scope",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedExpenseContract {
    expense_id: &'static str,
    status: &'static str,
    decision_count: i64,
}

impl SeedExpenseContract {
    fn decision_label(&self) -> &'static str {
        match self.expense_id {
            "EXP-seed-001" => "EXP-seed-001-decisions",
            "EXP-seed-002" => "EXP-seed-002-decisions",
            _ => "EXP-seed-003-decisions",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub flows_seeded: Vec<(&'static str, &'static str)>,
    pub expenses_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
