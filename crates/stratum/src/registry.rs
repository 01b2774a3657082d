//! The version ledger: one row per run in `schema_migrations`, plus the
//! current version in `schema_metadata`.

use crate::Result;
use crate::introspect;
use crate::traced::{Connection, ConnectionExt};
use stratum_ddl::Ident;

/// Create both ledger tables if they do not exist.
pub async fn ensure_tables<C: Connection>(conn: &C, schema: &str) -> Result<()> {
    let schema = Ident(schema);
    let sql = format!(
        r#"
CREATE TABLE IF NOT EXISTS {schema}.schema_migrations (
    version TEXT PRIMARY KEY,
    description TEXT,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    checksum TEXT,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS {schema}.schema_metadata (
    key TEXT PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);
"#
    );
    conn.traced().batch_execute(&sql).await?;
    Ok(())
}

/// A ledger entry to write.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version: String,
    pub description: String,
    pub checksum: String,
    /// Stored in `schema_metadata` under `schema_version`.
    pub metadata: serde_json::Value,
}

/// Upsert a successful run into both tables.
pub async fn record_success<C: Connection>(
    conn: &C,
    schema: &str,
    record: &VersionRecord,
) -> Result<()> {
    let schema = Ident(schema);
    let conn = conn.traced();
    conn.execute(
        &format!(
            "INSERT INTO {schema}.schema_migrations \
                 (version, description, applied_at, checksum, success, error_message) \
             VALUES ($1, $2, NOW(), $3, TRUE, NULL) \
             ON CONFLICT (version) DO UPDATE SET \
                 description = EXCLUDED.description, \
                 applied_at = EXCLUDED.applied_at, \
                 checksum = EXCLUDED.checksum, \
                 success = TRUE, \
                 error_message = NULL"
        ),
        &[&record.version, &record.description, &record.checksum],
    )
    .await?;
    conn.execute(
        &format!(
            "INSERT INTO {schema}.schema_metadata (key, value, updated_at) \
             VALUES ('schema_version', $1, NOW()) \
             ON CONFLICT (key) DO UPDATE SET \
                 value = EXCLUDED.value, \
                 updated_at = EXCLUDED.updated_at"
        ),
        &[&record.metadata],
    )
    .await?;
    tracing::info!(version = %record.version, "recorded schema version");
    Ok(())
}

/// Record a failed run, if the ledger exists. Never fails: this runs while
/// another error is already on its way to the caller.
pub async fn record_failure<C: Connection>(
    conn: &C,
    schema: &str,
    version: &str,
    checksum: &str,
    message: &str,
) {
    match introspect::table_exists(conn, schema, "schema_migrations").await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("no ledger yet, failed run not recorded");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not check for the ledger");
            return;
        }
    }

    let sql = format!(
        "INSERT INTO {}.schema_migrations \
             (version, description, applied_at, checksum, success, error_message) \
         VALUES ($1, 'failed run', NOW(), $2, FALSE, $3) \
         ON CONFLICT (version) DO UPDATE SET \
             applied_at = EXCLUDED.applied_at, \
             success = FALSE, \
             error_message = EXCLUDED.error_message",
        Ident(schema)
    );
    match conn
        .traced()
        .execute(&sql, &[&version, &checksum, &message])
        .await
    {
        Ok(_) => tracing::info!(%version, "recorded failed run"),
        Err(e) => tracing::warn!(error = %e, "could not record failed run"),
    }
}

/// The version stored in `schema_metadata`, if any.
pub async fn current_version<C: Connection>(
    conn: &C,
    schema: &str,
) -> Result<Option<serde_json::Value>> {
    let rows = conn
        .traced()
        .query(
            &format!(
                "SELECT value FROM {}.schema_metadata WHERE key = 'schema_version'",
                Ident(schema)
            ),
            &[],
        )
        .await?;
    match rows.first() {
        Some(row) => Ok(Some(row.try_get(0)?)),
        None => Ok(None),
    }
}
