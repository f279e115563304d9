//! Error types for ArcProc
//!
//! This module defines all error types raised by the procedural runtime.

use thiserror::Error;

use crate::storage::RowId;

/// The main error type for ArcProc
#[derive(Error, Debug)]
pub enum Error {
    // ========== Query Errors ==========
    #[error("Query error: no data found")]
    NoDataFound,

    #[error("Query error: exact fetch returned {0} rows, expected one")]
    TooManyRows(usize),

    #[error("Query error: {0}")]
    QueryParse(String),

    #[error("Query error: bind parameter ':{0}' is not declared")]
    UnknownBindParameter(String),

    #[error("Query error: cursor '{cursor}' expects at most {expected} argument(s), got {found}")]
    ParameterCount {
        cursor: String,
        expected: usize,
        found: usize,
    },

    #[error("Query error: parameter '{param}' of cursor '{cursor}' has no value and no default")]
    MissingArgument { cursor: String, param: String },

    // ========== Cursor Errors ==========
    #[error("Cursor error: cursor '{0}' is already open")]
    AlreadyOpen(String),

    #[error("Cursor error: cursor '{0}' is not open")]
    CursorNotOpen(String),

    #[error("Cursor error: cursor '{0}' has no current row")]
    NoCurrentRow(String),

    #[error("Cursor error: cursor '{0}' is not updatable (FOR UPDATE requires a single target table)")]
    NotUpdatable(String),

    #[error("Cursor error: unknown cursor handle {0}")]
    UnknownCursor(u64),

    // ========== Lock Errors ==========
    #[error("Lock error: row {0} is locked by another session")]
    LockConflict(RowId),

    #[error("Lock error: timed out waiting for row {0}")]
    LockTimeout(RowId),

    #[error("Lock error: deadlock detected while waiting for row {0}")]
    Deadlock(RowId),

    // ========== Trigger Errors ==========
    #[error("Trigger error: table '{0}' is mutating, trigger may not modify it")]
    MutatingTable(String),

    #[error("Trigger error: trigger '{trigger}' failed: {source}")]
    Handler {
        trigger: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Trigger error: :NEW is read-only in {0} phase")]
    ReadOnlyBinding(&'static str),

    #[error("Trigger error: {0} row binding is not available for this operation")]
    BindingUnavailable(&'static str),

    #[error("Trigger error: nesting depth limit {0} exceeded")]
    TriggerDepthExceeded(usize),

    #[error("Trigger error: view '{0}' has no INSTEAD OF trigger for this operation")]
    ViewNotUpdatable(String),

    #[error("Trigger error: cannot {0} while a DML statement is running")]
    TransactionControlInTrigger(&'static str),

    // ========== Package Errors ==========
    #[error("Package error: initialization of package '{package}' failed: {reason}")]
    InitializationFailed { package: String, reason: String },

    #[error("Package error: variable '{0}' is not declared in package '{1}'")]
    UnknownVariable(String, String),

    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: relation '{0}' already exists")]
    RelationAlreadyExists(String),

    #[error("Catalog error: column '{0}' not found in '{1}'")]
    ColumnNotFound(String, String),

    #[error("Catalog error: package '{0}' not found")]
    PackageNotFound(String),

    #[error("Catalog error: package '{0}' already exists")]
    PackageAlreadyExists(String),

    #[error("Catalog error: cursor '{0}' not found in package '{1}'")]
    PackageCursorNotFound(String, String),

    #[error("Catalog error: trigger '{0}' not found")]
    TriggerNotFound(String),

    #[error("Catalog error: trigger '{0}' already exists")]
    TriggerAlreadyExists(String),

    #[error("Catalog error: trigger '{trigger}' cannot be created: {reason}")]
    InvalidTriggerTarget { trigger: String, reason: String },

    // ========== Constraint Errors ==========
    #[error("Constraint error: null value not allowed for column '{0}'")]
    NullNotAllowed(String),

    #[error("Constraint error: primary key violation for table '{0}'")]
    PrimaryKeyViolation(String),

    #[error("Constraint error: table '{table}' has {expected} columns, row has {found}")]
    ArityMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    // ========== Session Errors ==========
    #[error("Session error: session {0} is closed")]
    SessionClosed(u64),

    #[error("Session error: savepoint '{0}' not established")]
    UnknownSavepoint(String),

    // ========== User Errors ==========
    #[error("Application error {code}: {message}")]
    Application { code: i32, message: String },

    #[error(transparent)]
    External(#[from] anyhow::Error),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Raise an application error from handler code
    pub fn application(code: i32, message: impl Into<String>) -> Self {
        Error::Application {
            code,
            message: message.into(),
        }
    }

    /// Unwrap nested trigger handler failures down to the error that started them
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Handler { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether this error comes from row lock contention
    pub fn is_contention(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::LockConflict(_) | Error::LockTimeout(_) | Error::Deadlock(_)
        )
    }
}

/// Result type alias for ArcProc operations
pub type Result<T> = std::result::Result<T, Error>;
