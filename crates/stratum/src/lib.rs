//! Tenant schema provisioning and drift reconciliation for Postgres.
//!
//! This crate provides:
//! - An ordered, verified pipeline of creation steps ([`SchemaPlan`])
//! - Cross-process mutual exclusion through advisory locks
//! - Reconciliation of declared columns against a live database
//! - A version ledger recording every run
//!
//! # Provisioning
//!
//! Schema sources are plain SQL holding `CREATE TABLE IF NOT EXISTS`
//! statements plus whatever functions, views and triggers go with them.
//! The [`Orchestrator`] runs them in order under an advisory lock, verifies
//! the result and records the version:
//!
//! ```ignore
//! let sources = SchemaSource::load_dir("schema".into())?;
//! let orchestrator = Orchestrator::new(
//!     &client,
//!     sources,
//!     Settings::default(),
//!     tracing::info_span!("provision", tenant = "acme"),
//! )?;
//! let report = orchestrator.run(RunOptions::default()).await?;
//! ```
//!
//! # Reconciliation
//!
//! Tables that already exist are never recreated, so columns added to the
//! sources later would never reach older databases. The last step of the
//! standard plan compares every declared table with the catalog and adds
//! what is missing. `NOT NULL` columns without a default are added nullable,
//! backfilled with a type-appropriate value and only then constrained.
//!
//! [`plan_table`] does the comparison without touching the database, which is
//! what `stratum plan` prints.

pub mod introspect;
pub mod lock;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod verify;

mod error;
mod orchestrator;
mod settings;
mod source;
mod traced;

pub use error::{Error, SyncError};
pub use lock::{LockHandle, LockKey};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport, RunState, StateLog};
pub use pipeline::{
    PlanOutcome, SchemaPlan, SchemaStep, StepAction, StepFn, StepKind, StepReport, StepStatus,
    Verifier, VerifyFn,
};
pub use reconcile::{
    ColumnChange, ColumnPlan, SyncResult, TablePlan, TableSyncDetail, TypeDrift, plan_schema,
    plan_table, sync_schema,
};
pub use settings::{DEFAULT_LOCK_NAME, RunOptions, Settings};
pub use source::{SchemaSource, checksum, expected_schema};
pub use traced::{BoxFuture, Connection, ConnectionExt, TracedConn};
pub use verify::VerificationReport;

pub use stratum_ddl as ddl;

pub type Result<T> = std::result::Result<T, Error>;
