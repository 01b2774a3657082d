//! Final integrity checks, independent of the individual step verifiers.

use crate::Result;
use crate::introspect;
use crate::settings::Settings;
use crate::traced::Connection;
use std::fmt;

/// What the final verification found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationReport {
    pub table_count: i64,
    pub min_table_count: usize,
    pub missing_tables: Vec<String>,
    pub missing_functions: Vec<String>,
    /// The compatibility view checked, if one is configured.
    pub view: Option<String>,
    pub view_present: bool,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.table_count >= self.min_table_count as i64
            && self.missing_tables.is_empty()
            && self.missing_functions.is_empty()
            && (self.view.is_none() || self.view_present)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tables (minimum {})",
            self.table_count, self.min_table_count
        )?;
        if !self.missing_tables.is_empty() {
            write!(f, "; missing tables: {}", self.missing_tables.join(", "))?;
        }
        if !self.missing_functions.is_empty() {
            write!(
                f,
                "; missing functions: {}",
                self.missing_functions.join(", ")
            )?;
        }
        if let Some(view) = &self.view {
            if !self.view_present {
                write!(f, "; missing view: {}", view)?;
            }
        }
        Ok(())
    }
}

/// Re-query the catalog for everything a finished schema must have.
pub async fn verify_schema<C: Connection>(
    conn: &C,
    settings: &Settings,
) -> Result<VerificationReport> {
    let schema = settings.schema.as_str();
    let table_count = introspect::count_tables(conn, schema).await?;
    let missing_tables = introspect::missing_tables(conn, schema, &settings.critical_tables).await?;
    let missing_functions =
        introspect::missing_functions(conn, schema, &settings.critical_functions).await?;
    let view_present = match &settings.compatibility_view {
        Some(view) => introspect::view_exists(conn, schema, view).await?,
        None => false,
    };

    let report = VerificationReport {
        table_count,
        min_table_count: settings.min_table_count,
        missing_tables,
        missing_functions,
        view: settings.compatibility_view.clone(),
        view_present,
    };
    tracing::debug!(ok = report.is_ok(), "{}", report);
    Ok(report)
}

/// Whether every critical table exists. This is what a waiting peer polls.
///
/// An empty list proves nothing about the lock holder's progress, so it
/// never counts as present.
pub async fn critical_tables_present<C: Connection>(conn: &C, settings: &Settings) -> Result<bool> {
    if settings.critical_tables.is_empty() {
        return Ok(false);
    }
    let missing =
        introspect::missing_tables(conn, &settings.schema, &settings.critical_tables).await?;
    Ok(missing.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traced::testing::NoDb;

    fn healthy() -> VerificationReport {
        VerificationReport {
            table_count: 52,
            min_table_count: 50,
            missing_tables: vec![],
            missing_functions: vec![],
            view: Some("unified_employees".into()),
            view_present: true,
        }
    }

    #[test]
    fn test_healthy_report() {
        let report = healthy();
        assert!(report.is_ok());
        assert_eq!(report.to_string(), "52 tables (minimum 50)");
    }

    #[test]
    fn test_each_check_can_fail_the_report() {
        let mut report = healthy();
        report.table_count = 49;
        assert!(!report.is_ok());

        let mut report = healthy();
        report.missing_tables = vec!["users".into()];
        assert!(!report.is_ok());

        let mut report = healthy();
        report.missing_functions = vec!["update_updated_at_column".into()];
        assert!(!report.is_ok());

        let mut report = healthy();
        report.view_present = false;
        assert!(!report.is_ok());
        assert_eq!(
            report.to_string(),
            "52 tables (minimum 50); missing view: unified_employees"
        );
    }

    #[tokio::test]
    async fn test_no_critical_tables_is_never_present() {
        let settings = Settings::default();
        assert!(settings.critical_tables.is_empty());
        assert!(!critical_tables_present(&NoDb, &settings).await.unwrap());
    }

    #[test]
    fn test_no_view_configured() {
        let mut report = healthy();
        report.view = None;
        report.view_present = false;
        assert!(report.is_ok());
    }
}
