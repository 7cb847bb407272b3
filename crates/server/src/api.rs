use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use outlay_core::domain::expense::ExpenseId;
use outlay_core::domain::user::UserId;
use outlay_core::errors::{ApplicationError, InterfaceError};
use outlay_core::flows::Decision;
use outlay_engine::{ApprovalService, InitiationOutcome, ServiceError};

#[derive(Clone)]
pub struct ApiState {
    pub approvals: Arc<ApprovalService>,
}

pub fn router(approvals: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/expenses/{id}/approval", post(initiate))
        .route("/expenses/{id}/decisions", post(decide))
        .route("/approvers/{id}/queue", get(queue))
        .route("/marketplace/auto-approve", post(auto_approve))
        .with_state(ApiState { approvals })
}

/// Interface-layer error envelope. Callers see a safe summary plus the
/// correlation id to quote when reporting the problem; the rule detail is
/// only as specific as the error class allows.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        Self(ApplicationError::from(value).into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, correlation_id) = match &self.0 {
            InterfaceError::BadRequest { message, correlation_id } => {
                (StatusCode::BAD_REQUEST, message.clone(), correlation_id.clone())
            }
            InterfaceError::ServiceUnavailable { message, correlation_id } => {
                (StatusCode::SERVICE_UNAVAILABLE, message.clone(), correlation_id.clone())
            }
            InterfaceError::Internal { message, correlation_id } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), correlation_id.clone())
            }
        };

        let body = ErrorBody { error: self.0.user_message(), detail, correlation_id };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct InitiationResponse {
    pub expense_id: String,
    pub outcome: &'static str,
    pub flow_id: Option<String>,
    pub level_count: Option<usize>,
}

pub async fn initiate(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
) -> Result<(StatusCode, Json<InitiationResponse>), ApiError> {
    let outcome = state.approvals.initiate_approval(&ExpenseId(expense_id.clone())).await?;

    let response = match outcome {
        InitiationOutcome::Started { flow_id, level_count } => InitiationResponse {
            expense_id,
            outcome: "started",
            flow_id: Some(flow_id.0),
            level_count: Some(level_count),
        },
        InitiationOutcome::Bypassed => InitiationResponse {
            expense_id,
            outcome: "bypassed",
            flow_id: None,
            level_count: None,
        },
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approver: String,
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub expense_id: String,
    pub status: &'static str,
    pub terminal: bool,
    pub correlation_id: String,
}

pub async fn decide(
    State(state): State<ApiState>,
    Path(expense_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let receipt = state
        .approvals
        .submit_decision(
            &ExpenseId(expense_id.clone()),
            &UserId(request.approver),
            request.decision,
            request.comments,
        )
        .await?;

    Ok(Json(DecisionResponse {
        expense_id,
        status: receipt.new_status.as_str(),
        terminal: receipt.outcome.terminal,
        correlation_id: receipt.correlation_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct QueueEntry {
    pub expense_id: String,
    pub amount: String,
    pub submitted_by: String,
    pub flow_id: Option<String>,
    pub level: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub approver: String,
    pub entries: Vec<QueueEntry>,
}

pub async fn queue(
    State(state): State<ApiState>,
    Path(approver): Path<String>,
) -> Result<Json<QueueResponse>, ApiError> {
    let pending = state.approvals.pending_for_approver(&UserId(approver.clone())).await?;

    let entries = pending
        .into_iter()
        .map(|item| QueueEntry {
            expense_id: item.expense.id.0,
            amount: item.expense.amount.to_string(),
            submitted_by: item.expense.submitted_by.0,
            flow_id: item.flow_id.map(|id| id.0),
            level: item.level,
        })
        .collect();

    Ok(Json(QueueResponse { approver, entries }))
}

#[derive(Debug, Deserialize)]
pub struct AutoApproveParams {
    pub vendor: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkippedExpense {
    pub expense_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AutoApproveResponse {
    pub approved: Vec<String>,
    pub skipped: Vec<SkippedExpense>,
    pub failed: Vec<SkippedExpense>,
}

pub async fn auto_approve(
    State(state): State<ApiState>,
    Query(params): Query<AutoApproveParams>,
) -> Result<Json<AutoApproveResponse>, ApiError> {
    let report = state
        .approvals
        .auto_approve_matching(params.vendor.as_deref(), params.category.as_deref())
        .await?;

    let itemize = |entries: Vec<(ExpenseId, String)>| -> Vec<SkippedExpense> {
        entries
            .into_iter()
            .map(|(id, reason)| SkippedExpense { expense_id: id.0, reason })
            .collect()
    };

    Ok(Json(AutoApproveResponse {
        approved: report.approved.into_iter().map(|id| id.0).collect(),
        skipped: itemize(report.skipped),
        failed: itemize(report.failed),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use outlay_core::audit::InMemoryAuditSink;
    use outlay_core::config::ApprovalsConfig;
    use outlay_core::domain::expense::{CostCenterId, Expense, ExpenseId, ExpenseStatus};
    use outlay_core::domain::flow::{ApprovalFlow, ApprovalLevel, FlowId};
    use outlay_core::domain::user::UserId;
    use outlay_core::flows::Decision;
    use outlay_db::repositories::{
        ExpenseRepository, InMemoryApprovalStateRepository, InMemoryExpenseRepository,
        InMemoryFlowRepository,
    };
    use outlay_engine::{ApprovalService, NoopTerminalHook};

    use super::{
        auto_approve, decide, initiate, queue, ApiState, AutoApproveParams, DecisionRequest,
    };

    async fn state_with_flow() -> ApiState {
        let now = Utc::now();
        let flow = ApprovalFlow {
            id: FlowId("flow-api".to_string()),
            name: "API test flow".to_string(),
            description: String::new(),
            min_amount: Decimal::ZERO,
            max_amount: None,
            cost_center_id: None,
            is_active: true,
            levels: vec![ApprovalLevel::any_one(vec![UserId::from("u-mgr")])],
            created_at: now,
            updated_at: now,
        };
        let flows = Arc::new(InMemoryFlowRepository::with_flows(vec![flow]).await);
        let expenses = Arc::new(InMemoryExpenseRepository::new());
        expenses
            .save(Expense {
                id: ExpenseId("EXP-api".to_string()),
                amount: Decimal::new(42_000, 2),
                cost_center_id: CostCenterId(1),
                submitted_by: UserId::from("u-emp"),
                vendor: None,
                category: None,
                status: ExpenseStatus::Pending,
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("save expense");

        let approvals = Arc::new(ApprovalService::new(
            flows,
            expenses,
            Arc::new(InMemoryApprovalStateRepository::new()),
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(NoopTerminalHook),
            ApprovalsConfig { bypass_on_no_flow: true, marketplace_approver: None },
        ));
        ApiState { approvals }
    }

    #[tokio::test]
    async fn initiate_then_decide_walks_the_expense_to_approved() {
        let state = state_with_flow().await;

        let (status, Json(initiation)) =
            initiate(State(state.clone()), Path("EXP-api".to_string()))
                .await
                .expect("initiate");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(initiation.outcome, "started");
        assert_eq!(initiation.flow_id.as_deref(), Some("flow-api"));

        let Json(queue_response) = queue(State(state.clone()), Path("u-mgr".to_string()))
            .await
            .expect("queue");
        assert_eq!(queue_response.entries.len(), 1);
        assert_eq!(queue_response.entries[0].expense_id, "EXP-api");

        let Json(decision) = decide(
            State(state),
            Path("EXP-api".to_string()),
            Json(DecisionRequest {
                approver: "u-mgr".to_string(),
                decision: Decision::Approve,
                comments: None,
            }),
        )
        .await
        .expect("decide");
        assert_eq!(decision.status, "approved");
        assert!(decision.terminal);
    }

    #[tokio::test]
    async fn unauthorized_approver_surfaces_as_bad_request() {
        let state = state_with_flow().await;
        initiate(State(state.clone()), Path("EXP-api".to_string())).await.expect("initiate");

        let error = decide(
            State(state),
            Path("EXP-api".to_string()),
            Json(DecisionRequest {
                approver: "u-stranger".to_string(),
                decision: Decision::Approve,
                comments: None,
            }),
        )
        .await
        .expect_err("unauthorized");

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn auto_approve_reports_a_reason_for_each_skipped_expense() {
        let now = Utc::now();
        let flow = ApprovalFlow {
            id: FlowId("flow-api".to_string()),
            name: "API test flow".to_string(),
            description: String::new(),
            min_amount: Decimal::ZERO,
            max_amount: None,
            cost_center_id: None,
            is_active: true,
            levels: vec![ApprovalLevel::any_one(vec![UserId::from("u-mgr")])],
            created_at: now,
            updated_at: now,
        };
        let flows = Arc::new(InMemoryFlowRepository::with_flows(vec![flow]).await);
        let expenses = Arc::new(InMemoryExpenseRepository::new());
        expenses
            .save(Expense {
                id: ExpenseId("EXP-vendor".to_string()),
                amount: Decimal::new(42_000, 2),
                cost_center_id: CostCenterId(1),
                submitted_by: UserId::from("u-emp"),
                vendor: Some("acme-supplies".to_string()),
                category: Some("office".to_string()),
                status: ExpenseStatus::Pending,
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("save expense");

        // The marketplace identity sits at no level of the flow, so the
        // expense can only be skipped, never approved.
        let approvals = Arc::new(ApprovalService::new(
            flows,
            expenses,
            Arc::new(InMemoryApprovalStateRepository::new()),
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(NoopTerminalHook),
            ApprovalsConfig {
                bypass_on_no_flow: false,
                marketplace_approver: Some("u-market".to_string()),
            },
        ));
        let state = ApiState { approvals };

        initiate(State(state.clone()), Path("EXP-vendor".to_string())).await.expect("initiate");

        let Json(report) = auto_approve(
            State(state),
            Query(AutoApproveParams {
                vendor: Some("acme-supplies".to_string()),
                category: None,
            }),
        )
        .await
        .expect("auto-approve");

        assert!(report.approved.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].expense_id, "EXP-vendor");
        assert!(
            report.skipped[0].reason.contains("u-market"),
            "skip reason must name the blocked identity: {}",
            report.skipped[0].reason
        );
    }

    #[tokio::test]
    async fn unknown_expense_surfaces_as_bad_request() {
        let state = state_with_flow().await;

        let error = initiate(State(state), Path("EXP-ghost".to_string()))
            .await
            .expect_err("missing expense");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
