use thiserror::Error;

use crate::domain::expense::ExpenseStatus;
use crate::domain::flow::FlowValidationError;
use crate::flows::DecisionError;

/// Business-rule failures. The violated rule stays visible in the message
/// and is never retried automatically.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("expense cannot move from {from:?} to {to:?}")]
    InvalidExpenseTransition { from: ExpenseStatus, to: ExpenseStatus },
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    FlowValidation(#[from] FlowValidationError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Boundary shape: every variant carries the correlation id the caller can
/// quote when reporting the problem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request was rejected by an approval rule. Review the detail and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The approval service is temporarily unavailable. Retry shortly."
            }
            Self::Internal { .. } => {
                "Something went wrong on our side. Quote the correlation id when reporting it."
            }
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            // Rule violations surface the specific rule, not a generic
            // validation failure.
            Self::Domain(domain) => {
                InterfaceError::BadRequest { message: domain.to_string(), correlation_id }
            }
            Self::Persistence(message) | Self::Integration(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            Self::Configuration(message) => InterfaceError::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::flows::DecisionError;

    #[test]
    fn decision_error_maps_to_bad_request_with_rule_detail() {
        let interface = ApplicationError::from(DomainError::from(
            DecisionError::UnauthorizedApprover { approver: "u-intern".to_string(), level: 1 },
        ))
        .into_interface("req-1");

        match interface {
            InterfaceError::BadRequest { message, correlation_id } => {
                assert_eq!(correlation_id, "req-1");
                assert!(message.contains("u-intern"), "rule violated must be visible: {message}");
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "missing approval state".to_owned(),
        ))
        .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request was rejected by an approval rule. Review the detail and retry."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration(
            "no approval flow matched and bypass is disabled".to_owned(),
        )
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(
            interface.user_message(),
            "Something went wrong on our side. Quote the correlation id when reporting it."
        );
    }
}
