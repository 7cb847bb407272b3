use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::expense::ExpenseId;

/// Which stage of the pipeline produced the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Ingress,
    Selection,
    Flow,
    Persistence,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Identity shared by every event of one operation: which expense, which
/// request, who acted. Built once per service call, then stamped onto
/// each event via [`AuditContext::event`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub expense_id: Option<ExpenseId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        expense_id: Option<ExpenseId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { expense_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            expense_id: self.expense_id.clone(),
            correlation_id: self.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: self.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub expense_id: Option<ExpenseId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Test double. Clones share one buffer, so the sink handed to a service
/// under test and the copy kept by the test observe the same events.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    buffer: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}

/// Production sink: every event becomes one structured log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            expense_id = event.expense_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            correlation_id = %event.correlation_id,
            actor = %event.actor,
            metadata = ?event.metadata,
            "audit event",
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink},
        domain::expense::ExpenseId,
    };

    fn context() -> AuditContext {
        AuditContext::new(Some(ExpenseId("EXP-2026-0042".to_owned())), "req-123", "u-manager")
    }

    #[test]
    fn events_inherit_the_context_identity() {
        let event = context()
            .event("approval.decision_applied", AuditCategory::Flow, AuditOutcome::Success)
            .with_metadata("from", "awaiting_level_0")
            .with_metadata("to", "awaiting_level_1");

        assert_eq!(event.correlation_id, "req-123");
        assert_eq!(event.actor, "u-manager");
        assert_eq!(event.expense_id.as_ref().map(|id| id.0.as_str()), Some("EXP-2026-0042"));
        assert_eq!(event.metadata.get("to").map(String::as_str), Some("awaiting_level_1"));
    }

    #[test]
    fn cloned_sinks_share_one_buffer() {
        let sink = InMemoryAuditSink::default();
        let handle = sink.clone();
        handle.emit(context().event(
            "approval.initiated",
            AuditCategory::Selection,
            AuditOutcome::Success,
        ));

        assert_eq!(sink.events().len(), 1);
        assert_ne!(sink.events()[0].event_id, "");
    }
}
