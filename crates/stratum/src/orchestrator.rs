//! One provisioning run, start to finish.
//!
//! ```ignore
//! let sources = SchemaSource::load_dir("schema".into())?;
//! let span = tracing::info_span!("provision", tenant = "acme");
//! let orchestrator = Orchestrator::new(&client, sources, Settings::default(), span)?;
//! let report = orchestrator.run(RunOptions::default()).await?;
//! report.log();
//! ```

use crate::lock::{self, LockHandle};
use crate::pipeline::{self, SchemaPlan, StepReport, StepStatus};
use crate::reconcile::SyncResult;
use crate::registry::{self, VersionRecord};
use crate::settings::{RunOptions, Settings};
use crate::source::{self, SchemaSource};
use crate::traced::{Connection, ConnectionExt};
use crate::verify::{self, VerificationReport};
use crate::{Error, Result};
use std::fmt;
use std::time::{Duration, Instant};
use stratum_ddl::Ident;
use tracing::Instrument;

/// Where a run is. Every transition is logged and kept in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    ConnectionVerified,
    LockAcquired,
    WaitingOnPeerLock,
    Running { ordinal: u32 },
    Verified { ordinal: u32 },
    StepFailed { ordinal: u32 },
    FinalVerification,
    VersionRecorded,
    LockReleased,
    Completed,
    Failed,
}

/// The transitions a run went through, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateLog {
    states: Vec<RunState>,
}

impl StateLog {
    pub fn enter(&mut self, state: RunState) {
        tracing::debug!(?state, "run state");
        self.states.push(state);
    }

    pub fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::NotStarted)
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This process held the lock and ran the plan.
    Created,
    /// Another process held the lock; its tables appeared within the
    /// timeout.
    PeerCompleted { waited: Duration },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Created => write!(f, "created"),
            RunOutcome::PeerCompleted { waited } => {
                write!(f, "completed by a concurrent run (waited {:?})", waited)
            }
        }
    }
}

/// Everything a successful run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
    /// `None` when a peer did the work.
    pub verification: Option<VerificationReport>,
    /// `None` when reconciliation was skipped or a peer did the work.
    pub sync: Option<SyncResult>,
    pub states: StateLog,
    pub duration: Duration,
}

impl RunReport {
    /// A run that finished but whose reconciliation collected errors.
    pub fn is_degraded(&self) -> bool {
        let sync_failed = self.sync.as_ref().is_some_and(|sync| !sync.is_clean());
        let step_failed = self
            .steps
            .iter()
            .any(|step| matches!(step.status, StepStatus::FailedOptional(_)));
        sync_failed || step_failed
    }

    /// Emit the report to the log: one event per step, then a summary.
    pub fn log(&self) {
        for step in &self.steps {
            match &step.status {
                StepStatus::Succeeded => {
                    tracing::info!(step = %step.name, ordinal = step.ordinal, duration = ?step.duration, "ok")
                }
                StepStatus::Skipped => {
                    tracing::info!(step = %step.name, ordinal = step.ordinal, "skipped")
                }
                StepStatus::FailedOptional(message) => {
                    tracing::warn!(step = %step.name, ordinal = step.ordinal, error = %message, "failed")
                }
            }
        }
        if let Some(verification) = &self.verification {
            tracing::info!("final verification: {}", verification);
        }
        if let Some(sync) = &self.sync {
            if sync.is_clean() {
                tracing::info!(
                    tables = sync.tables_processed,
                    columns_created = sync.columns_created,
                    "schema sync clean"
                );
            } else {
                for error in &sync.errors {
                    tracing::warn!(%error, "schema sync error");
                }
            }
        }
        if self.is_degraded() {
            tracing::warn!(outcome = %self.outcome, duration = ?self.duration, "schema run finished degraded");
        } else {
            tracing::info!(outcome = %self.outcome, duration = ?self.duration, "schema run finished");
        }
    }
}

/// Runs a [`SchemaPlan`] against one connection under the advisory lock.
pub struct Orchestrator<'c, C: Connection> {
    conn: &'c C,
    plan: SchemaPlan<C>,
    settings: Settings,
    span: tracing::Span,
}

impl<'c, C: Connection> Orchestrator<'c, C> {
    /// An orchestrator running the standard plan over `sources`.
    pub fn new(
        conn: &'c C,
        sources: Vec<SchemaSource>,
        settings: Settings,
        span: tracing::Span,
    ) -> Result<Self> {
        let plan = SchemaPlan::standard(sources, &settings)?;
        Ok(Self::from_plan(conn, plan, settings, span))
    }

    /// An orchestrator running `plan`.
    ///
    /// With no critical tables configured, every table the plan's sources
    /// declare becomes critical. Those are what a waiting peer polls for.
    pub fn from_plan(
        conn: &'c C,
        plan: SchemaPlan<C>,
        mut settings: Settings,
        span: tracing::Span,
    ) -> Self {
        if settings.critical_tables.is_empty() {
            settings.critical_tables = plan.expected().table_names().map(String::from).collect();
        }
        Self {
            conn,
            plan,
            settings,
            span,
        }
    }

    pub fn plan(&self) -> &SchemaPlan<C> {
        &self.plan
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the plan. Fatal errors come back after the lock is released.
    ///
    /// The advisory lock is session-level and released by a statement at the
    /// end of the run. If the returned future is dropped or a custom step
    /// panics while the lock is held, the lock stays held until the session
    /// closes. A pooled connection must then be discarded
    /// (`deadpool_postgres::Object::take`) rather than returned to the pool.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let mut states = StateLog::default();
        self.run_with_log(options, &mut states).await
    }

    /// [`run`](Self::run), recording transitions into `states`. On error the
    /// log ends in [`RunState::Failed`].
    pub async fn run_with_log(
        &self,
        options: RunOptions,
        states: &mut StateLog,
    ) -> Result<RunReport> {
        self.run_inner(options, states)
            .instrument(self.span.clone())
            .await
    }

    async fn run_inner(&self, options: RunOptions, states: &mut StateLog) -> Result<RunReport> {
        let started = Instant::now();
        tracing::info!(
            schema = %self.settings.schema,
            steps = self.plan.steps().len(),
            "starting schema run"
        );

        if let Err(source) = self.conn.traced().query_one("SELECT 1", &[]).await {
            states.enter(RunState::Failed);
            return Err(Error::Connection { source });
        }
        states.enter(RunState::ConnectionVerified);

        let acquired = match self.prepare_session().await {
            Ok(()) => lock::try_acquire(self.conn, self.settings.lock_key).await,
            Err(e) => Err(e),
        };
        let handle = match acquired {
            Ok(handle) => handle,
            Err(e) => {
                states.enter(RunState::Failed);
                tracing::error!(error = %e, "schema run failed before taking the lock");
                return Err(e);
            }
        };
        if !handle.acquired {
            states.enter(RunState::WaitingOnPeerLock);
            tracing::info!(key = %handle.key, "schema creation in progress elsewhere, waiting");
            let waited = lock::wait_for_peer(
                handle.key,
                self.settings.lock_timeout,
                self.settings.poll_interval,
                || verify::critical_tables_present(self.conn, &self.settings),
            )
            .await;
            return match waited {
                Ok(waited) => {
                    states.enter(RunState::Completed);
                    Ok(RunReport {
                        outcome: RunOutcome::PeerCompleted { waited },
                        steps: Vec::new(),
                        verification: None,
                        sync: None,
                        states: states.clone(),
                        duration: started.elapsed(),
                    })
                }
                Err(e) => {
                    states.enter(RunState::Failed);
                    Err(e)
                }
            };
        }
        states.enter(RunState::LockAcquired);

        let result = self.run_locked(&options, states).await;
        if let Err(e) = &result {
            self.record_failure(e).await;
        }
        self.release(&handle, states).await;

        match result {
            Ok((outcome, verification)) => {
                states.enter(RunState::Completed);
                Ok(RunReport {
                    outcome: RunOutcome::Created,
                    steps: outcome.steps,
                    verification: Some(verification),
                    sync: outcome.sync,
                    states: states.clone(),
                    duration: started.elapsed(),
                })
            }
            Err(e) => {
                states.enter(RunState::Failed);
                tracing::error!(error = %e, duration = ?started.elapsed(), "schema run failed");
                Err(e)
            }
        }
    }

    /// Session settings for the run: statement timeout and search path.
    async fn prepare_session(&self) -> Result<()> {
        let conn = self.conn.traced();
        if let Some(timeout) = self.settings.statement_timeout {
            conn.batch_execute(&format!(
                "SET statement_timeout = {}",
                timeout.as_millis()
            ))
            .await?;
        }
        if self.settings.schema != "public" {
            conn.batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema}; SET search_path TO {schema}, public",
                schema = Ident(&self.settings.schema)
            ))
            .await?;
        }
        Ok(())
    }

    async fn run_locked(
        &self,
        options: &RunOptions,
        states: &mut StateLog,
    ) -> Result<(pipeline::PlanOutcome, VerificationReport)> {
        let outcome =
            pipeline::run_plan(self.conn, &self.plan, &self.settings.schema, options, states)
                .await?;

        states.enter(RunState::FinalVerification);
        let verification = verify::verify_schema(self.conn, &self.settings).await?;
        if !verification.is_ok() {
            return Err(Error::FinalVerification(Box::new(verification)));
        }

        registry::record_success(
            self.conn,
            &self.settings.schema,
            &self.version_record(&outcome, &verification),
        )
        .await?;
        states.enter(RunState::VersionRecorded);

        Ok((outcome, verification))
    }

    fn version_record(
        &self,
        outcome: &pipeline::PlanOutcome,
        verification: &VerificationReport,
    ) -> VersionRecord {
        let sources = self.plan.sources();
        let checksum = source::checksum(&sources);
        let source_names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        let metadata = serde_json::json!({
            "version": self.settings.schema_version,
            "checksum": checksum,
            "applied_at": chrono::Utc::now().to_rfc3339(),
            "sources": source_names,
            "table_count": verification.table_count,
            "steps": outcome.steps.len(),
            "columns_synced": outcome.sync.as_ref().map_or(0, |sync| sync.columns_created),
        });
        VersionRecord {
            version: self.settings.schema_version.clone(),
            description: format!("schema created from {} source(s)", sources.len()),
            checksum,
            metadata,
        }
    }

    async fn record_failure(&self, error: &Error) {
        let checksum = source::checksum(&self.plan.sources());
        registry::record_failure(
            self.conn,
            &self.settings.schema,
            &self.settings.schema_version,
            &checksum,
            &error.to_string(),
        )
        .await;
    }

    async fn release(&self, handle: &LockHandle, states: &mut StateLog) {
        lock::release(self.conn, handle).await;
        states.enter(RunState::LockReleased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traced::testing::NoDb;

    fn sources() -> Vec<SchemaSource> {
        vec![
            SchemaSource::new(
                "001_core",
                "CREATE TABLE IF NOT EXISTS users (id UUID PRIMARY KEY);",
            ),
            SchemaSource::new(
                "002_hr",
                "CREATE TABLE IF NOT EXISTS profiles (id SERIAL PRIMARY KEY);
                 CREATE OR REPLACE VIEW unified_employees AS SELECT id FROM profiles;",
            ),
        ]
    }

    #[test]
    fn test_default_critical_tables_come_from_sources() {
        let orchestrator =
            Orchestrator::new(&NoDb, sources(), Settings::default(), tracing::Span::none())
                .unwrap();
        assert_eq!(
            orchestrator.settings().critical_tables,
            vec!["users".to_string(), "profiles".to_string()]
        );
    }

    #[test]
    fn test_configured_critical_tables_are_kept() {
        let settings = Settings {
            critical_tables: vec!["users".into()],
            ..Settings::default()
        };
        let orchestrator =
            Orchestrator::new(&NoDb, sources(), settings, tracing::Span::none()).unwrap();
        assert_eq!(orchestrator.settings().critical_tables, vec!["users".to_string()]);
    }

    #[test]
    fn test_state_log_starts_not_started() {
        let mut log = StateLog::default();
        assert_eq!(log.current(), RunState::NotStarted);
        log.enter(RunState::ConnectionVerified);
        log.enter(RunState::LockAcquired);
        assert_eq!(log.current(), RunState::LockAcquired);
        assert_eq!(log.states().len(), 2);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Created.to_string(), "created");
        assert_eq!(
            RunOutcome::PeerCompleted {
                waited: Duration::from_secs(3)
            }
            .to_string(),
            "completed by a concurrent run (waited 3s)"
        );
    }

    fn report(steps: Vec<StepReport>, sync: Option<SyncResult>) -> RunReport {
        RunReport {
            outcome: RunOutcome::Created,
            steps,
            verification: None,
            sync,
            states: StateLog::default(),
            duration: Duration::ZERO,
        }
    }

    fn step(status: StepStatus) -> StepReport {
        StepReport {
            ordinal: 1,
            name: "auto_sync".into(),
            duration: Duration::ZERO,
            status,
        }
    }

    #[test]
    fn test_degraded_reports() {
        assert!(!report(vec![step(StepStatus::Succeeded)], None).is_degraded());
        assert!(!report(vec![step(StepStatus::Skipped)], None).is_degraded());
        assert!(report(vec![step(StepStatus::FailedOptional("boom".into()))], None).is_degraded());

        let sync = SyncResult {
            errors: vec!["users.email: permission denied".into()],
            ..SyncResult::default()
        };
        assert!(report(vec![step(StepStatus::Succeeded)], Some(sync)).is_degraded());
        assert!(!report(vec![], Some(SyncResult::default())).is_degraded());
    }
}
