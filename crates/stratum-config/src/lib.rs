//! Configuration types for `.config/stratum.styx`.
//!
//! Every field is optional; anything left out falls back to the built-in
//! defaults of `stratum::Settings`.
//!
//! ```styx
//! database {
//!   url postgres://localhost/tenant_acme
//! }
//! schema {
//!   name public
//!   sources schema
//!   version 2.3.0
//! }
//! lock {
//!   timeout_ms 30000
//! }
//! verify {
//!   min_tables 50
//!   tables (users employees departments)
//! }
//! ```

use facet::Facet;

/// Configuration loaded from `stratum.styx`.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Database connection.
    #[facet(default)]
    pub database: DatabaseConfig,

    /// What to create and where.
    #[facet(default)]
    pub schema: SchemaConfig,

    /// Advisory lock coordination between concurrent runs.
    #[facet(default)]
    pub lock: LockConfig,

    /// Final verification thresholds.
    #[facet(default)]
    pub verify: VerifyConfig,

    /// Session and run switches.
    #[facet(default)]
    pub run: RunConfig,
}

/// Database connection.
#[derive(Debug, Clone, Default, Facet)]
pub struct DatabaseConfig {
    /// Connection URL. `DATABASE_URL` and `--database-url` take precedence.
    #[facet(default)]
    pub url: Option<String>,
}

/// What to create and where.
#[derive(Debug, Clone, Default, Facet)]
pub struct SchemaConfig {
    /// Postgres schema the tables live in (default `public`).
    #[facet(default)]
    pub name: Option<String>,

    /// Directory of `*.sql` sources, relative to the project root.
    #[facet(default)]
    pub sources: Option<String>,

    /// Version label recorded in the ledger.
    #[facet(default)]
    pub version: Option<String>,

    /// Extensions to create before anything else.
    #[facet(default)]
    pub extensions: Option<Vec<String>>,
}

/// Advisory lock coordination.
#[derive(Debug, Clone, Default, Facet)]
pub struct LockConfig {
    /// Lock name; the key is derived from it by hashing.
    #[facet(default)]
    pub name: Option<String>,

    /// Explicit lock key. Wins over `name`.
    #[facet(default)]
    pub key: Option<i64>,

    /// How long to wait for a concurrent run to finish.
    #[facet(default)]
    pub timeout_ms: Option<u64>,

    #[facet(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Final verification thresholds.
#[derive(Debug, Clone, Default, Facet)]
pub struct VerifyConfig {
    /// Minimum number of tables in the schema.
    #[facet(default)]
    pub min_tables: Option<u64>,

    /// Tables that must exist.
    #[facet(default)]
    pub tables: Option<Vec<String>>,

    /// Functions that must exist.
    #[facet(default)]
    pub functions: Option<Vec<String>>,

    /// View that must exist. An empty string disables the check.
    #[facet(default)]
    pub view: Option<String>,
}

/// Session and run switches.
#[derive(Debug, Clone, Default, Facet)]
pub struct RunConfig {
    #[facet(default)]
    pub statement_timeout_ms: Option<u64>,

    /// Skip the reconciliation step.
    #[facet(default)]
    pub skip_auto_sync: Option<bool>,

    /// Log every reconciliation statement.
    #[facet(default)]
    pub verbose: Option<bool>,
}
