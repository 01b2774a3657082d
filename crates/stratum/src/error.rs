use crate::verify::VerificationReport;
use camino::Utf8PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("database health check failed: {source}")]
    Connection {
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("step {ordinal} ({name}) failed after {elapsed:?}: {source}")]
    Step {
        ordinal: u32,
        name: String,
        elapsed: Duration,
        #[source]
        source: Box<Error>,
    },

    #[error("final verification failed: {0}")]
    FinalVerification(Box<VerificationReport>),

    #[error("timed out after {waited:?} waiting for the holder of advisory lock {key} to finish")]
    LockTimeout { key: i64, waited: Duration },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("failed to read schema source {path}: {source}")]
    Source {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("verification failed: {0}")]
    Verification(String),
}

impl Error {
    /// Wrap an error with the context of the step that produced it.
    pub fn in_step(self, ordinal: u32, name: impl Into<String>, elapsed: Duration) -> Self {
        Error::Step {
            ordinal,
            name: name.into(),
            elapsed,
            source: Box::new(self),
        }
    }

    /// The `(ordinal, name)` of the failing step, if this is a step error.
    pub fn step(&self) -> Option<(u32, &str)> {
        match self {
            Error::Step { ordinal, name, .. } => Some((*ordinal, name)),
            _ => None,
        }
    }
}

/// Non-fatal reconciliation errors, collected into the sync report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{table}: could not read columns: {message}")]
    Introspect { table: String, message: String },

    #[error("{table}.{column}: {message}")]
    Column {
        table: String,
        column: String,
        message: String,
    },

    #[error("{table}.{column}: foreign key {constraint}: {message}")]
    ForeignKey {
        table: String,
        column: String,
        constraint: String,
        message: String,
    },
}

/// The server's message for a database error, or the driver's rendering of
/// anything else.
pub(crate) fn db_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}
