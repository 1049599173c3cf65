use serde::Serialize;
use thiserror::Error;

use crate::flows::TransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {reason}")]
    Validation { field: String, reason: String },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("not permitted: {action} requires operator access")]
    Forbidden { action: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), reason: reason.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden { action: action.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// A chunked write stopped part-way; `applied` rows are already durable.
    #[error("dependency failure after {applied} applied row(s): {message}")]
    Dependency { applied: usize, message: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::validation(field, reason))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::Domain(DomainError::not_found(entity, id))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Domain(DomainError::Conflict(message.into()))
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Domain(DomainError::forbidden(action))
    }
}

impl From<TransitionError> for ApplicationError {
    fn from(value: TransitionError) -> Self {
        Self::Domain(DomainError::Transition(value))
    }
}

/// Failure of a derivative side effect (commission accrual, notification).
/// Logged and reported next to the result; never rolls back the primary write.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[error("{effect} failed for {entity} `{entity_id}`: {message}")]
pub struct SideEffectFailure {
    pub effect: &'static str,
    pub entity: &'static str,
    pub entity_id: String,
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "This action is limited to operators.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The request conflicts with the current state of the record.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let message = error.to_string();
                match error {
                    DomainError::Validation { .. } | DomainError::InvariantViolation(_) => {
                        Self::BadRequest { message, correlation_id }
                    }
                    DomainError::Transition(TransitionError::MissingField { .. })
                    | DomainError::Transition(TransitionError::Locked { .. }) => {
                        Self::BadRequest { message, correlation_id }
                    }
                    DomainError::Forbidden { .. } => Self::Forbidden { message, correlation_id },
                    DomainError::NotFound { .. } => Self::NotFound { message, correlation_id },
                    DomainError::Conflict(_) | DomainError::Transition(_) => {
                        Self::Conflict { message, correlation_id }
                    }
                }
            }
            ApplicationError::Dependency { .. } | ApplicationError::Persistence(_) => {
                Self::ServiceUnavailable { message: value.to_string(), correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::quote::QuoteStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::flows::{EntityKind, TransitionError};

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::validation("manifest", "no parsable rows")
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.status_code(), 400);
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn rejected_transition_maps_to_conflict_and_keeps_detail() {
        let error = TransitionError::NotAllowed {
            entity: EntityKind::Quote,
            from: QuoteStatus::Quoted.to_string(),
            to: QuoteStatus::Paid.to_string(),
            allowed: vec!["accepted".to_string(), "cancelled".to_string()],
        };
        let interface = ApplicationError::from(error).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(interface.message().contains("{accepted, cancelled}"));
    }

    #[test]
    fn missing_operator_access_maps_to_403_not_a_validation_error() {
        let interface = ApplicationError::forbidden("price list adjustment").into_interface("req-6");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.status_code(), 403);
        assert_eq!(interface.correlation_id(), "req-6");
        assert!(interface.message().contains("price list adjustment"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let interface = ApplicationError::from(DomainError::not_found("device", 42))
            .into_interface("req-3");

        assert_eq!(interface.status_code(), 404);
        assert_eq!(interface.message(), "device `42` was not found");
    }

    #[test]
    fn dependency_failure_reports_applied_prefix() {
        let interface = ApplicationError::Dependency {
            applied: 450,
            message: "database lock timeout".to_owned(),
        }
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.message().contains("450 applied"));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad chunk size".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "req-5");
    }
}
