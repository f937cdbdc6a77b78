use miette::Diagnostic;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The kind of persisted entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Request,
    Task,
    Payment,
    Earning,
    Remittance,
    Rating,
    Rider,
    Customer,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Task => "task",
            Self::Payment => "payment",
            Self::Earning => "earning",
            Self::Remittance => "remittance",
            Self::Rating => "rating",
            Self::Rider => "rider",
            Self::Customer => "customer",
        }
    }
}

/// Identifies the offending entity of a failed operation.
///
/// This is the only context a domain error exposes to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u32,
}

impl EntityRef {
    pub fn request(id: u32) -> Self {
        Self {
            kind: EntityKind::Request,
            id,
        }
    }

    pub fn task(id: u32) -> Self {
        Self {
            kind: EntityKind::Task,
            id,
        }
    }

    pub fn payment(id: u32) -> Self {
        Self {
            kind: EntityKind::Payment,
            id,
        }
    }

    pub fn earning(id: u32) -> Self {
        Self {
            kind: EntityKind::Earning,
            id,
        }
    }

    pub fn remittance(id: u32) -> Self {
        Self {
            kind: EntityKind::Remittance,
            id,
        }
    }

    pub fn rating(id: u32) -> Self {
        Self {
            kind: EntityKind::Rating,
            id,
        }
    }

    pub fn rider(id: u32) -> Self {
        Self {
            kind: EntityKind::Rider,
            id,
        }
    }

    pub fn customer(id: u32) -> Self {
        Self {
            kind: EntityKind::Customer,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind.as_str(), self.id)
    }
}

/// Flat classification of [`PipelineError`], one per user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidTransition,
    AlreadyTaken,
    Conflict,
    Forbidden,
    AmountMismatch,
    DuplicateAccrual,
    NotCompletable,
    AlreadyRated,
    Validation,
    Internal,
}

#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    #[error("{0} not found")]
    #[diagnostic(code(billrunner::not_found))]
    NotFound(EntityRef),

    #[error("operation not valid for the current state of {0}")]
    #[diagnostic(code(billrunner::invalid_state))]
    InvalidState(EntityRef),

    #[error("out-of-order status transition for {0}")]
    #[diagnostic(code(billrunner::invalid_transition))]
    InvalidTransition(EntityRef),

    #[error("{0} was already taken by another rider")]
    #[diagnostic(
        code(billrunner::already_taken),
        help("refresh the list of available tasks and pick another one")
    )]
    AlreadyTaken(EntityRef),

    #[error("concurrent modification of {0}")]
    #[diagnostic(code(billrunner::conflict))]
    Conflict(EntityRef),

    #[error("actor is not allowed to act on {0}")]
    #[diagnostic(code(billrunner::forbidden))]
    Forbidden(EntityRef),

    #[error("collected amount does not reconcile with {0}")]
    #[diagnostic(
        code(billrunner::amount_mismatch),
        help("collected must equal bill amount plus service fee exactly")
    )]
    AmountMismatch(EntityRef),

    #[error("conflicting accrual already recorded for {0}")]
    #[diagnostic(
        code(billrunner::duplicate_accrual),
        help("an upstream reconciliation bug produced two different amounts for one task")
    )]
    DuplicateAccrual(EntityRef),

    #[error("{0} has not been completed")]
    #[diagnostic(code(billrunner::not_completable))]
    NotCompletable(EntityRef),

    #[error("{0} has already been rated")]
    #[diagnostic(code(billrunner::already_rated))]
    AlreadyRated(EntityRef),

    #[error("Validation error: {0}")]
    #[diagnostic(code(billrunner::validation))]
    ValidationError(String),

    #[error("CSV error: {0}")]
    #[diagnostic(code(billrunner::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(billrunner::io))]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(billrunner::config))]
    ConfigError(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(billrunner::internal))]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::AlreadyTaken(_) => ErrorKind::AlreadyTaken,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::AmountMismatch(_) => ErrorKind::AmountMismatch,
            Self::DuplicateAccrual(_) => ErrorKind::DuplicateAccrual,
            Self::NotCompletable(_) => ErrorKind::NotCompletable,
            Self::AlreadyRated(_) => ErrorKind::AlreadyRated,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::CsvError(_) | Self::IoError(_) | Self::ConfigError(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The entity a domain error refers to, if any.
    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Self::NotFound(e)
            | Self::InvalidState(e)
            | Self::InvalidTransition(e)
            | Self::AlreadyTaken(e)
            | Self::Conflict(e)
            | Self::Forbidden(e)
            | Self::AmountMismatch(e)
            | Self::DuplicateAccrual(e)
            | Self::NotCompletable(e)
            | Self::AlreadyRated(e) => Some(*e),
            _ => None,
        }
    }

    /// Lost races; the caller should re-read available work and pick again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyTaken(_))
    }

    /// Reconciliation failures that must reach a human operator.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::AmountMismatch(_) | Self::DuplicateAccrual(_))
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_exposes_only_kind_and_id() {
        let err = PipelineError::AmountMismatch(EntityRef::request(12));
        assert_eq!(
            err.to_string(),
            "collected amount does not reconcile with request #12"
        );
        assert_eq!(err.kind(), ErrorKind::AmountMismatch);
        assert_eq!(err.entity(), Some(EntityRef::request(12)));
    }

    #[test]
    fn test_error_classification() {
        assert!(PipelineError::AlreadyTaken(EntityRef::task(1)).is_retryable());
        assert!(!PipelineError::Conflict(EntityRef::task(1)).is_retryable());
        assert!(PipelineError::DuplicateAccrual(EntityRef::task(1)).is_integrity_violation());
        assert!(!PipelineError::Forbidden(EntityRef::task(1)).is_integrity_violation());
        assert_eq!(
            PipelineError::ValidationError("bad".into()).kind(),
            ErrorKind::Validation
        );
    }
}
