//! Ordered creation steps.
//!
//! A [`SchemaPlan`] is a validated list of [`SchemaStep`]s. Steps run one at
//! a time in ordinal order; each may assume everything earlier steps created
//! exists. A failed required step aborts the plan, a failed optional step is
//! recorded and skipped.

use crate::orchestrator::{RunState, StateLog};
use crate::reconcile::{self, SyncResult};
use crate::settings::{RunOptions, Settings};
use crate::source::{self, SchemaSource};
use crate::traced::{BoxFuture, Connection, ConnectionExt};
use crate::{Error, Result, introspect, registry};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use stratum_ddl::{ExpectedSchema, Ident};

/// A custom step body.
pub type StepFn<C> = for<'a> fn(&'a C, &'a RunOptions) -> BoxFuture<'a, Result<()>>;

/// A custom post-condition check.
pub type VerifyFn<C> = for<'a> fn(&'a C) -> BoxFuture<'a, Result<()>>;

/// What a step does.
pub enum StepAction<C> {
    /// `CREATE EXTENSION IF NOT EXISTS` for each name.
    CreateExtensions(Vec<String>),
    /// Create the version ledger tables.
    CreateRegistry,
    /// Execute a source's SQL as one batch.
    ApplySource(SchemaSource),
    /// Add missing columns to existing tables.
    Reconcile,
    Custom(StepFn<C>),
}

impl<C> fmt::Debug for StepAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::CreateExtensions(names) => {
                f.debug_tuple("CreateExtensions").field(names).finish()
            }
            StepAction::CreateRegistry => f.write_str("CreateRegistry"),
            StepAction::ApplySource(source) => {
                f.debug_tuple("ApplySource").field(&source.name).finish()
            }
            StepAction::Reconcile => f.write_str("Reconcile"),
            StepAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A step's post-condition, checked after its action succeeds.
pub enum Verifier<C> {
    TablesExist(Vec<String>),
    ExtensionsInstalled(Vec<String>),
    Custom(VerifyFn<C>),
}

impl<C> fmt::Debug for Verifier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verifier::TablesExist(names) => f.debug_tuple("TablesExist").field(names).finish(),
            Verifier::ExtensionsInstalled(names) => {
                f.debug_tuple("ExtensionsInstalled").field(names).finish()
            }
            Verifier::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Failure aborts the run.
    Required,
    /// Failure is logged and the run continues.
    Optional,
}

#[derive(Debug)]
pub struct SchemaStep<C> {
    pub ordinal: u32,
    pub name: String,
    pub action: StepAction<C>,
    pub verifier: Option<Verifier<C>>,
    pub kind: StepKind,
}

impl<C> SchemaStep<C> {
    pub fn required(ordinal: u32, name: impl Into<String>, action: StepAction<C>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            action,
            verifier: None,
            kind: StepKind::Required,
        }
    }

    pub fn optional(ordinal: u32, name: impl Into<String>, action: StepAction<C>) -> Self {
        Self {
            kind: StepKind::Optional,
            ..Self::required(ordinal, name, action)
        }
    }

    pub fn verified_by(mut self, verifier: Verifier<C>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

/// A validated, ordered list of steps.
#[derive(Debug)]
pub struct SchemaPlan<C> {
    steps: Vec<SchemaStep<C>>,
    expected: ExpectedSchema,
}

impl<C: Connection> SchemaPlan<C> {
    /// Validate `steps`: ordinals strictly increasing, names unique, and at
    /// most one reconciliation step, which must come last.
    pub fn new(steps: Vec<SchemaStep<C>>) -> Result<Self> {
        let mut names = HashSet::new();
        for (i, step) in steps.iter().enumerate() {
            if i > 0 && step.ordinal <= steps[i - 1].ordinal {
                return Err(Error::InvalidPlan(format!(
                    "step {} ({}) does not come after step {} ({})",
                    step.ordinal,
                    step.name,
                    steps[i - 1].ordinal,
                    steps[i - 1].name
                )));
            }
            if !names.insert(step.name.as_str()) {
                return Err(Error::InvalidPlan(format!(
                    "duplicate step name {}",
                    step.name
                )));
            }
            if matches!(step.action, StepAction::Reconcile) && i + 1 != steps.len() {
                return Err(Error::InvalidPlan(format!(
                    "reconciliation step {} ({}) must be the last step",
                    step.ordinal, step.name
                )));
            }
        }

        let sources: Vec<SchemaSource> = steps
            .iter()
            .filter_map(|step| match &step.action {
                StepAction::ApplySource(source) => Some(source.clone()),
                _ => None,
            })
            .collect();
        let expected = source::expected_schema(&sources);

        Ok(Self { steps, expected })
    }

    /// The stock plan: extensions, the version ledger, one step per source
    /// in order, then optional reconciliation.
    pub fn standard(sources: Vec<SchemaSource>, settings: &Settings) -> Result<Self> {
        let mut steps = Vec::new();
        let mut ordinal = 0;
        let mut next = || {
            ordinal += 1;
            ordinal
        };

        if !settings.extensions.is_empty() {
            steps.push(
                SchemaStep::required(
                    next(),
                    "extensions",
                    StepAction::CreateExtensions(settings.extensions.clone()),
                )
                .verified_by(Verifier::ExtensionsInstalled(settings.extensions.clone())),
            );
        }

        steps.push(
            SchemaStep::required(next(), "version_registry", StepAction::CreateRegistry)
                .verified_by(Verifier::TablesExist(vec![
                    "schema_migrations".to_string(),
                    "schema_metadata".to_string(),
                ])),
        );

        for source in sources {
            let tables: Vec<String> = source.parse().table_names().map(String::from).collect();
            let name = format!("apply:{}", source.name);
            let step = SchemaStep::required(next(), name, StepAction::ApplySource(source));
            steps.push(if tables.is_empty() {
                step
            } else {
                step.verified_by(Verifier::TablesExist(tables))
            });
        }

        steps.push(SchemaStep::optional(
            next(),
            "auto_sync",
            StepAction::Reconcile,
        ));

        Self::new(steps)
    }
}

impl<C> SchemaPlan<C> {
    pub fn steps(&self) -> &[SchemaStep<C>] {
        &self.steps
    }

    /// Every table the plan's sources declare.
    pub fn expected(&self) -> &ExpectedSchema {
        &self.expected
    }

    /// The sources the plan applies, in order.
    pub fn sources(&self) -> Vec<SchemaSource> {
        self.steps
            .iter()
            .filter_map(|step| match &step.action {
                StepAction::ApplySource(source) => Some(source.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Skipped,
    /// An optional step failed; the run went on.
    FailedOptional(String),
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub ordinal: u32,
    pub name: String,
    pub duration: Duration,
    pub status: StepStatus,
}

/// What running a plan produced.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub steps: Vec<StepReport>,
    /// Set when the reconciliation step ran.
    pub sync: Option<SyncResult>,
}

/// Run every step in order.
///
/// A failing required step stops the run; its error comes back wrapped with
/// the step's ordinal, name and elapsed time.
pub async fn run_plan<C: Connection>(
    conn: &C,
    plan: &SchemaPlan<C>,
    schema: &str,
    options: &RunOptions,
    states: &mut StateLog,
) -> Result<PlanOutcome> {
    let mut outcome = PlanOutcome::default();

    for step in &plan.steps {
        if matches!(step.action, StepAction::Reconcile) && options.skip_auto_sync {
            tracing::info!(step = %step.name, ordinal = step.ordinal, "skipped");
            outcome.steps.push(StepReport {
                ordinal: step.ordinal,
                name: step.name.clone(),
                duration: Duration::ZERO,
                status: StepStatus::Skipped,
            });
            continue;
        }

        states.enter(RunState::Running {
            ordinal: step.ordinal,
        });
        let started = Instant::now();
        let result = run_step(conn, plan, step, schema, options).await;
        let duration = started.elapsed();

        let status = match result {
            Ok(sync) => {
                states.enter(RunState::Verified {
                    ordinal: step.ordinal,
                });
                tracing::info!(step = %step.name, ordinal = step.ordinal, ?duration, "step complete");
                if sync.is_some() {
                    outcome.sync = sync;
                }
                StepStatus::Succeeded
            }
            Err(e) => {
                states.enter(RunState::StepFailed {
                    ordinal: step.ordinal,
                });
                match step.kind {
                    StepKind::Optional => {
                        tracing::warn!(
                            step = %step.name,
                            ordinal = step.ordinal,
                            error = %e,
                            "optional step failed, continuing"
                        );
                        StepStatus::FailedOptional(e.to_string())
                    }
                    StepKind::Required => {
                        tracing::error!(step = %step.name, ordinal = step.ordinal, error = %e, "step failed");
                        return Err(e.in_step(step.ordinal, step.name.clone(), duration));
                    }
                }
            }
        };

        outcome.steps.push(StepReport {
            ordinal: step.ordinal,
            name: step.name.clone(),
            duration,
            status,
        });
    }

    Ok(outcome)
}

async fn run_step<C: Connection>(
    conn: &C,
    plan: &SchemaPlan<C>,
    step: &SchemaStep<C>,
    schema: &str,
    options: &RunOptions,
) -> Result<Option<SyncResult>> {
    let mut sync = None;
    match &step.action {
        StepAction::CreateExtensions(names) => {
            for name in names {
                conn.traced()
                    .batch_execute(&format!("CREATE EXTENSION IF NOT EXISTS {}", Ident(name)))
                    .await?;
            }
        }
        StepAction::CreateRegistry => registry::ensure_tables(conn, schema).await?,
        StepAction::ApplySource(source) => conn.traced().batch_execute(&source.sql).await?,
        StepAction::Reconcile => {
            sync = Some(reconcile::sync_schema(conn, &plan.expected, schema, options.verbose).await?)
        }
        StepAction::Custom(body) => body(conn, options).await?,
    }

    if let Some(verifier) = &step.verifier {
        verify(conn, verifier, schema).await?;
    }
    Ok(sync)
}

async fn verify<C: Connection>(conn: &C, verifier: &Verifier<C>, schema: &str) -> Result<()> {
    match verifier {
        Verifier::TablesExist(tables) => {
            let missing = introspect::missing_tables(conn, schema, tables).await?;
            if !missing.is_empty() {
                return Err(Error::Verification(format!(
                    "tables not created: {}",
                    missing.join(", ")
                )));
            }
        }
        Verifier::ExtensionsInstalled(extensions) => {
            let missing = introspect::missing_extensions(conn, extensions).await?;
            if !missing.is_empty() {
                return Err(Error::Verification(format!(
                    "extensions not installed: {}",
                    missing.join(", ")
                )));
            }
        }
        Verifier::Custom(check) => check(conn).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traced::testing::NoDb;
    use std::cell::RefCell;

    thread_local! {
        static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    fn calls() -> Vec<&'static str> {
        CALLS.with(|c| c.borrow().clone())
    }

    fn ok_step<'a>(_: &'a NoDb, _: &'a RunOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async {
            CALLS.with(|c| c.borrow_mut().push("ok"));
            Ok(())
        })
    }

    fn failing_step<'a>(_: &'a NoDb, _: &'a RunOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async {
            CALLS.with(|c| c.borrow_mut().push("fail"));
            Err(Error::Verification("boom".into()))
        })
    }

    fn failing_check(_: &NoDb) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(Error::Verification("post-condition not met".into())) })
    }

    fn custom(ordinal: u32, body: StepFn<NoDb>) -> SchemaStep<NoDb> {
        SchemaStep::required(ordinal, format!("step_{ordinal}"), StepAction::Custom(body))
    }

    async fn run(plan: &SchemaPlan<NoDb>, options: RunOptions) -> (Result<PlanOutcome>, StateLog) {
        let mut states = StateLog::default();
        let result = run_plan(&NoDb, plan, "public", &options, &mut states).await;
        (result, states)
    }

    #[tokio::test]
    async fn test_required_failure_stops_the_run() {
        let steps = (1..=8)
            .map(|i| custom(i, if i == 6 { failing_step } else { ok_step }))
            .collect();
        let plan = SchemaPlan::new(steps).unwrap();

        let (result, states) = run(&plan, RunOptions::default()).await;
        let err = result.unwrap_err();

        assert_eq!(err.step(), Some((6, "step_6")));
        assert!(err.to_string().starts_with("step 6 (step_6) failed after"));
        assert_eq!(calls(), vec!["ok", "ok", "ok", "ok", "ok", "fail"]);
        assert_eq!(
            states.states().last(),
            Some(&RunState::StepFailed { ordinal: 6 })
        );
    }

    #[tokio::test]
    async fn test_optional_failure_continues() {
        let plan = SchemaPlan::new(vec![
            custom(1, ok_step),
            SchemaStep::<NoDb>::optional(2, "flaky", StepAction::Custom(failing_step)),
            custom(3, ok_step),
        ])
        .unwrap();

        let (result, _) = run(&plan, RunOptions::default()).await;
        let outcome = result.unwrap();
        let statuses: Vec<_> = outcome.steps.iter().map(|s| s.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Succeeded,
                StepStatus::FailedOptional("verification failed: boom".into()),
                StepStatus::Succeeded,
            ]
        );
        assert_eq!(calls(), vec!["ok", "fail", "ok"]);
    }

    #[tokio::test]
    async fn test_verifier_failure_fails_the_step() {
        let plan = SchemaPlan::new(vec![
            custom(1, ok_step).verified_by(Verifier::Custom(failing_check)),
            custom(2, ok_step),
        ])
        .unwrap();

        let (result, _) = run(&plan, RunOptions::default()).await;
        let err = result.unwrap_err();
        assert_eq!(err.step(), Some((1, "step_1")));
        assert_eq!(calls(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_skip_auto_sync_never_touches_the_database() {
        let plan = SchemaPlan::new(vec![
            custom(1, ok_step),
            SchemaStep::optional(2, "auto_sync", StepAction::Reconcile),
        ])
        .unwrap();

        let options = RunOptions {
            skip_auto_sync: true,
            verbose: false,
        };
        let (result, states) = run(&plan, options).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.steps[1].status, StepStatus::Skipped);
        assert!(outcome.sync.is_none());
        assert_eq!(
            states.states(),
            &[
                RunState::Running { ordinal: 1 },
                RunState::Verified { ordinal: 1 },
            ]
        );
    }

    #[test]
    fn test_plan_validation() {
        let err = SchemaPlan::new(vec![custom(2, ok_step), custom(1, ok_step)]).unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(_)));

        let err = SchemaPlan::new(vec![custom(1, ok_step), custom(1, ok_step)]).unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(_)));

        let err = SchemaPlan::new(vec![
            SchemaStep::<NoDb>::required(1, "a", StepAction::Custom(ok_step)),
            SchemaStep::<NoDb>::required(2, "a", StepAction::Custom(ok_step)),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate step name a"));

        let err = SchemaPlan::new(vec![
            SchemaStep::optional(1, "auto_sync", StepAction::Reconcile),
            custom(2, ok_step),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must be the last step"));
    }

    #[test]
    fn test_standard_plan_layout() {
        let sources = vec![
            SchemaSource::new(
                "001_core",
                "CREATE TABLE IF NOT EXISTS users (id UUID PRIMARY KEY, email TEXT NOT NULL);",
            ),
            SchemaSource::new(
                "002_functions",
                "CREATE OR REPLACE FUNCTION noop() RETURNS void AS $$ BEGIN END; $$ LANGUAGE plpgsql;",
            ),
        ];
        let plan = SchemaPlan::<NoDb>::standard(sources, &Settings::default()).unwrap();

        let layout: Vec<_> = plan
            .steps()
            .iter()
            .map(|s| format!("{} {} {:?} {:?}", s.ordinal, s.name, s.kind, s.verifier))
            .collect();
        insta::assert_snapshot!(layout.join("\n"), @r#"
        1 extensions Required Some(ExtensionsInstalled(["pgcrypto"]))
        2 version_registry Required Some(TablesExist(["schema_migrations", "schema_metadata"]))
        3 apply:001_core Required Some(TablesExist(["users"]))
        4 apply:002_functions Required None
        5 auto_sync Optional None
        "#);
        assert_eq!(plan.expected().table_names().collect::<Vec<_>>(), vec!["users"]);
        assert_eq!(plan.sources().len(), 2);
    }

    #[test]
    fn test_standard_plan_without_extensions() {
        let settings = Settings {
            extensions: vec![],
            ..Settings::default()
        };
        let plan = SchemaPlan::<NoDb>::standard(vec![], &settings).unwrap();
        let names: Vec<_> = plan.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["version_registry", "auto_sync"]);
    }
}
