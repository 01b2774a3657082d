//! Terminal rendering for run reports, plans and parse results.

use owo_colors::{OwoColorize, Style};
use std::fmt::Write;
use std::io::IsTerminal;
use stratum::ddl::ParsedSource;
use stratum::{RunOutcome, RunReport, StepStatus, TablePlan};

/// Renders text, with or without ANSI colors.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    color: bool,
}

impl Printer {
    /// Colors when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        Self {
            color: std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self { color: false }
    }

    fn paint(&self, text: impl std::fmt::Display, style: Style) -> String {
        if self.color {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    fn ok(&self, text: impl std::fmt::Display) -> String {
        self.paint(text, Style::new().green())
    }

    fn warn(&self, text: impl std::fmt::Display) -> String {
        self.paint(text, Style::new().yellow())
    }

    fn error(&self, text: impl std::fmt::Display) -> String {
        self.paint(text, Style::new().red().bold())
    }

    fn dim(&self, text: impl std::fmt::Display) -> String {
        self.paint(text, Style::new().dimmed())
    }

    fn heading(&self, text: impl std::fmt::Display) -> String {
        self.paint(text, Style::new().bold())
    }

    pub fn report(&self, report: &RunReport) -> String {
        let mut out = String::new();
        let headline = match report.outcome {
            RunOutcome::Created => "schema provisioned".to_string(),
            RunOutcome::PeerCompleted { waited } => {
                format!("schema provisioned by a concurrent run (waited {:?})", waited)
            }
        };
        let _ = writeln!(
            out,
            "{} {}",
            self.heading(headline),
            self.dim(format!("in {:?}", report.duration))
        );

        for step in &report.steps {
            let (mark, note) = match &step.status {
                StepStatus::Succeeded => (self.ok("ok"), String::new()),
                StepStatus::Skipped => (self.dim("skipped"), String::new()),
                StepStatus::FailedOptional(message) => (self.warn("failed"), format!(": {message}")),
            };
            let _ = writeln!(
                out,
                "  {:>2} {:<24} {} {}{}",
                step.ordinal,
                step.name,
                mark,
                self.dim(format!("{:?}", step.duration)),
                note
            );
        }

        if let Some(verification) = &report.verification {
            let _ = writeln!(out, "verification: {}", verification);
        }
        if let Some(sync) = &report.sync {
            let _ = writeln!(
                out,
                "sync: {} table(s), {} column(s) created, {} error(s)",
                sync.tables_processed,
                sync.columns_created,
                sync.errors.len()
            );
            for error in &sync.errors {
                let _ = writeln!(out, "  {} {}", self.warn("!"), error);
            }
            for detail in &sync.tables {
                for drift in &detail.type_drift {
                    let _ = writeln!(out, "  {} {}.{}", self.warn("drift"), detail.table, drift);
                }
            }
        }
        out
    }

    /// Human-readable plans, or the SQL they would run.
    pub fn plans(&self, plans: &[TablePlan], schema: &str, sql: bool) -> String {
        let pending: Vec<&TablePlan> = plans.iter().filter(|plan| !plan.is_empty()).collect();
        if pending.is_empty() {
            return format!("{}\n", self.ok("database matches the sources"));
        }

        let mut out = String::new();
        for plan in pending {
            if sql {
                let _ = writeln!(out, "{}", self.dim(format!("-- {}", plan.table)));
                out.push_str(&plan.to_sql(schema));
                for drift in &plan.type_drift {
                    let _ = writeln!(out, "{}", self.dim(format!("-- type drift: {}", drift)));
                }
            } else {
                let _ = write!(out, "{}", plan);
            }
        }
        out
    }

    pub fn parsed(&self, sources: &[ParsedSource]) -> String {
        let mut out = String::new();
        for source in sources {
            let _ = writeln!(out, "{}", self.heading(&source.source));
            for table in &source.tables {
                let _ = writeln!(out, "  {} ({} columns)", table.name, table.columns.len());
                for column in table.columns.values() {
                    let mut attrs = Vec::new();
                    if column.primary_key {
                        attrs.push("PK".to_string());
                    }
                    if column.unique {
                        attrs.push("UNIQUE".to_string());
                    }
                    if !column.nullable {
                        attrs.push("NOT NULL".to_string());
                    }
                    if let Some(default) = &column.default {
                        attrs.push(format!("DEFAULT {}", default));
                    }
                    if let Some(reference) = &column.references {
                        attrs.push(format!("-> {}", reference.table));
                    }

                    let attrs = if attrs.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", attrs.join(", "))
                    };
                    let _ = writeln!(out, "    {}: {}{}", column.name, column.column_type, attrs);
                }
            }
            for warning in &source.warnings {
                let _ = writeln!(out, "  {} {}", self.error("warning:"), warning);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratum::ddl::parse_source;
    use stratum::{
        RunOutcome, StateLog, StepReport, SyncResult, TableSyncDetail, VerificationReport,
        plan_table,
    };

    fn step(ordinal: u32, name: &str, status: StepStatus) -> StepReport {
        StepReport {
            ordinal,
            name: name.into(),
            duration: Duration::from_millis(12),
            status,
        }
    }

    #[test]
    fn test_report() {
        let report = RunReport {
            outcome: RunOutcome::Created,
            steps: vec![
                step(1, "extensions", StepStatus::Succeeded),
                step(2, "apply:001_core", StepStatus::Succeeded),
                step(3, "auto_sync", StepStatus::FailedOptional("timeout".into())),
            ],
            verification: Some(VerificationReport {
                table_count: 52,
                min_table_count: 50,
                view: Some("unified_employees".into()),
                view_present: true,
                ..Default::default()
            }),
            sync: Some(SyncResult {
                tables_processed: 2,
                columns_created: 1,
                errors: vec!["users.email: permission denied".into()],
                tables: vec![TableSyncDetail {
                    table: "users".into(),
                    ..Default::default()
                }],
                duration: Duration::ZERO,
            }),
            states: StateLog::default(),
            duration: Duration::from_secs(2),
        };

        insta::assert_snapshot!(Printer::plain().report(&report), @r"
        schema provisioned in 2s
           1 extensions               ok 12ms
           2 apply:001_core           ok 12ms
           3 auto_sync                failed 12ms: timeout
        verification: 52 tables (minimum 50)
        sync: 2 table(s), 1 column(s) created, 1 error(s)
          ! users.email: permission denied
        ");
    }

    #[test]
    fn test_plans_when_in_sync() {
        assert_eq!(
            Printer::plain().plans(&[TablePlan::default()], "public", false),
            "database matches the sources\n"
        );
    }

    #[test]
    fn test_plan_sql() {
        let parsed = parse_source(
            "users.sql",
            "CREATE TABLE IF NOT EXISTS users (id INTEGER, nickname TEXT);",
        );
        let plan = plan_table(&parsed.tables[0], &Default::default());

        insta::assert_snapshot!(Printer::plain().plans(&[plan], "public", true), @r#"
        -- users
        ALTER TABLE "public"."users" ADD COLUMN IF NOT EXISTS "id" INTEGER;
        ALTER TABLE "public"."users" ADD COLUMN IF NOT EXISTS "nickname" TEXT;
        "#);
    }

    #[test]
    fn test_parsed() {
        let parsed = parse_source(
            "core.sql",
            "CREATE TABLE IF NOT EXISTS posts (
                id SERIAL PRIMARY KEY,
                author_id INTEGER NOT NULL REFERENCES users(id),
                body TEXT DEFAULT 'draft',
                location geography(POINT)
            );",
        );

        insta::assert_snapshot!(Printer::plain().parsed(&[parsed]), @r"
        core.sql
          posts (3 columns)
            id: SERIAL [PK]
            author_id: INTEGER [NOT NULL, -> users]
            body: TEXT [DEFAULT 'draft']
          warning: table `posts`: skipped column `location`: unsupported type `geography(POINT)`
        ");
    }
}
