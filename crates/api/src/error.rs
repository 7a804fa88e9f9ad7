use async_graphql::{Error, ErrorExtensions};
use entity::deal::Stage;
use sea_orm::{DbErr, RuntimeErr, SqlErr, SqlxError};
use thiserror::Error;

use crate::rules::stage_key;

pub type CrmResult<T> = Result<T, CrmError>;

/// Failures surfaced by the pipeline services.
///
/// Every variant maps to a stable `code()` so the API layer can translate it
/// without inspecting messages.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database error: {0}")]
    Db(DbErr),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("probability {probability} is outside {min}-{max}% for stage {}", key(.stage))]
    ProbabilityOutOfBand {
        stage: Stage,
        probability: i16,
        min: i16,
        max: i16,
    },
    #[error("a lost reason is required to close a deal as lost")]
    MissingLostReason,
    #[error("actual close date cannot be before expected close date")]
    CloseBeforeExpected,
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("amount cannot be negative")]
    NegativeAmount,
    #[error("amount cannot exceed {max} cents")]
    AmountTooLarge { max: i64 },
    #[error("unsupported currency {0}")]
    UnsupportedCurrency(String),
    #[error("due date cannot be in the past for open tasks")]
    DueInPast,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("deal is already closed as {}", key(.from))]
    Terminal { from: Stage },
    #[error("unknown stage {0}")]
    UnknownStage(String),
}

fn key(stage: &Stage) -> &'static str {
    stage_key(*stage)
}

impl CrmError {
    pub fn code(&self) -> &'static str {
        match self {
            CrmError::Validation(_) => "VALIDATION",
            CrmError::InvalidTransition(_) => "INVALID_TRANSITION",
            CrmError::Conflict(_) => "CONFLICT",
            CrmError::NotFound(_) => "NOT_FOUND",
            CrmError::Db(_) => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CrmError::Conflict(_))
    }
}

impl From<DbErr> for CrmError {
    fn from(value: DbErr) -> Self {
        match value.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => CrmError::Conflict(detail),
            _ if is_write_contention(&value) => {
                CrmError::Conflict("concurrent write, retry the operation".into())
            }
            _ => CrmError::Db(value),
        }
    }
}

fn is_write_contention(err: &DbErr) -> bool {
    let (DbErr::Conn(runtime) | DbErr::Exec(runtime) | DbErr::Query(runtime)) = err else {
        return false;
    };
    let RuntimeErr::SqlxError(SqlxError::Database(db_err)) = runtime else {
        return false;
    };
    db_err
        .code()
        .map(|code| is_contention_code(&code))
        .unwrap_or(false)
}

/// Postgres serialization/deadlock/lock-timeout SQLSTATEs, and SQLite
/// `BUSY`/`LOCKED` including their extended codes.
fn is_contention_code(code: &str) -> bool {
    match code {
        "40001" | "40P01" | "55P03" => true,
        sqlite if sqlite.len() < 5 => sqlite
            .parse::<i32>()
            .map(|value| matches!(value & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

impl ErrorExtensions for CrmError {
    fn extend(&self) -> Error {
        let message = match self {
            CrmError::Db(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        Error::new(message).extend_with(|_, e| {
            e.set("code", self.code());
            if self.is_retryable() {
                e.set("retryable", true);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Value;

    #[test]
    fn database_errors_are_masked() {
        let err = CrmError::Db(DbErr::Custom("boom".into())).extend();
        assert_eq!(err.message, "internal server error");
        let code = err.extensions.as_ref().and_then(|map| map.get("code")).cloned();
        assert_eq!(code, Some(Value::from("INTERNAL")));
    }

    #[test]
    fn conflicts_are_flagged_retryable() {
        let err = CrmError::Conflict("deal changed".into());
        assert!(err.is_retryable());
        let ext = err.extend();
        let retryable = ext
            .extensions
            .as_ref()
            .and_then(|map| map.get("retryable"))
            .cloned();
        assert_eq!(retryable, Some(Value::from(true)));
    }

    #[test]
    fn lock_contention_codes_are_recognised() {
        for code in ["40001", "40P01", "5", "517", "261", "6"] {
            assert!(is_contention_code(code), "{code}");
        }
        for code in ["23505", "42P01", "19", "2067", "08006"] {
            assert!(!is_contention_code(code), "{code}");
        }
    }

    #[test]
    fn band_message_names_the_stage() {
        let err = ValidationError::ProbabilityOutOfBand {
            stage: Stage::Qualified,
            probability: 80,
            min: 30,
            max: 50,
        };
        assert_eq!(
            err.to_string(),
            "probability 80 is outside 30-50% for stage qualified"
        );
        assert_eq!(CrmError::from(err).code(), "VALIDATION");
    }
}
