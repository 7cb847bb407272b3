use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use outlay_core::audit::TracingAuditSink;
use outlay_core::config::{AppConfig, ConfigError, LoadOptions};
use outlay_core::domain::expense::Expense;
use outlay_core::flows::ApprovalState;
use outlay_db::repositories::{
    SqlApprovalStateRepository, SqlExpenseRepository, SqlFlowRepository,
};
use outlay_db::{connect_with_settings, migrations, DbPool};
use outlay_engine::{ApprovalService, HookError, TerminalHook};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub approvals: Arc<ApprovalService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

/// Terminal outcomes are announced as structured log lines. When the
/// accounting sync integration is enabled this is where its dispatch will
/// hang off.
struct LogTerminalHook;

#[async_trait]
impl TerminalHook for LogTerminalHook {
    async fn on_terminal(&self, expense: &Expense, state: &ApprovalState) -> Result<(), HookError> {
        info!(
            event_name = "approval.terminal",
            expense_id = %expense.id.0,
            status = expense.status.as_str(),
            decision_count = state.decisions.len(),
            "expense reached a terminal approval status"
        );
        Ok(())
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let approvals = Arc::new(ApprovalService::new(
        Arc::new(SqlFlowRepository::new(db_pool.clone())),
        Arc::new(SqlExpenseRepository::new(db_pool.clone())),
        Arc::new(SqlApprovalStateRepository::new(db_pool.clone())),
        Arc::new(TracingAuditSink),
        Arc::new(LogTerminalHook),
        config.approvals.clone(),
    ));

    Ok(Application { config, db_pool, approvals })
}
