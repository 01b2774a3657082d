//! Run-time settings.

use crate::lock::LockKey;
use std::time::Duration;

/// Lock name hashed into the default advisory lock key.
pub const DEFAULT_LOCK_NAME: &str = "stratum.schema_creation";

/// Externalizable constants for a provisioning run.
///
/// [`Settings::default`] describes a stock tenant database; the CLI overlays
/// values from the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Schema the tables live in.
    pub schema: String,
    pub lock_key: LockKey,
    /// How long a peer waits for the lock holder to finish.
    pub lock_timeout: Duration,
    pub poll_interval: Duration,
    /// Final verification fails with fewer tables than this in the schema.
    pub min_table_count: usize,
    /// Tables that must exist after a run. A waiting peer also polls for
    /// these to decide that the lock holder finished. Empty means every
    /// table the sources declare.
    pub critical_tables: Vec<String>,
    pub critical_functions: Vec<String>,
    /// A view that must exist after a run, if any.
    pub compatibility_view: Option<String>,
    /// Extensions created before any source is applied.
    pub extensions: Vec<String>,
    /// Applied as `SET statement_timeout` for the run's session.
    pub statement_timeout: Option<Duration>,
    /// Version label recorded in the ledger.
    pub schema_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            lock_key: LockKey::from_name(DEFAULT_LOCK_NAME),
            lock_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            min_table_count: 50,
            critical_tables: Vec::new(),
            critical_functions: vec!["update_updated_at_column".to_string()],
            compatibility_view: Some("unified_employees".to_string()),
            extensions: vec!["pgcrypto".to_string()],
            statement_timeout: None,
            schema_version: "1.0.0".to_string(),
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip the reconciliation step.
    pub skip_auto_sync: bool,
    /// Log every statement the reconciliation step plans.
    pub verbose: bool,
}
