use std::fmt;

use thiserror::Error;

/// Row-level lookup/consistency problems. These are reported against a single
/// range or dealer row and never abort the rest of the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIssue {
    DealerOutsideSlab { dealer_code: String, slab: String },
    DuplicateDealer { dealer_code: String },
    DuplicateRange { slab: String },
    NoSlabForDistance { dealer_code: String, km: String },
    UnknownRow,
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowIssue::DealerOutsideSlab { dealer_code, slab } => {
                write!(f, "dealer {dealer_code} is not eligible for slab {slab}")
            }
            RowIssue::DuplicateDealer { dealer_code } => {
                write!(f, "dealer {dealer_code} is already added to this range")
            }
            RowIssue::DuplicateRange { slab } => write!(f, "slab {slab} is already used in this entry"),
            RowIssue::NoSlabForDistance { dealer_code, km } => {
                write!(f, "no rate slab covers {km} km (dealer {dealer_code})")
            }
            RowIssue::UnknownRow => write!(f, "row no longer exists in this entry"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("main bill {0} already exists; confirm overwrite to replace it")]
    BillNumberExists(String),
    #[error("{0}")]
    Row(RowIssue),
    #[error("database error: {}", sqlite_error_string(.0))]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pdf error: {0}")]
    Pdf(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<RowIssue> for BillingError {
    fn from(value: RowIssue) -> Self {
        BillingError::Row(value)
    }
}

impl From<BillingError> for String {
    fn from(value: BillingError) -> Self {
        value.to_string()
    }
}

pub(crate) fn validation(msg: impl Into<String>) -> BillingError {
    BillingError::Validation(msg.into())
}

pub fn sqlite_error_string(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let message = msg.clone().unwrap_or_default();
            format!(
                "sqlite(code={:?}, extended_code={}, msg={})",
                code.code, code.extended_code, message
            )
        }
        other => other.to_string(),
    }
}

/// True for UNIQUE / FOREIGN KEY violations, which callers map to user-facing conflicts.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _) if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
