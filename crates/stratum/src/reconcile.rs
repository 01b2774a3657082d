//! Drift reconciliation: add the columns the sources declare but the live
//! tables lack.
//!
//! Reconciliation only ever adds. Columns the database has but the sources do
//! not mention are left alone, type differences are reported but never
//! altered, and tables that do not exist yet are skipped (creating them is
//! the job of the source's own `CREATE TABLE IF NOT EXISTS`).
//!
//! A missing `NOT NULL` column without a default cannot be added in one
//! statement to a table that already has rows, so it is added in three:
//!
//! ```sql
//! ALTER TABLE "public"."users" ADD COLUMN IF NOT EXISTS "age" INTEGER;
//! UPDATE "public"."users" SET "age" = '0'::INTEGER WHERE "age" IS NULL;
//! ALTER TABLE "public"."users" ALTER COLUMN "age" SET NOT NULL;
//! ```
//!
//! Those run in one transaction, so a failure leaves no half-added column.

use crate::error::db_message;
use crate::introspect::{self, ActualColumn};
use crate::traced::{Connection, ConnectionExt};
use crate::{Result, SyncError};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use stratum_ddl::{
    ColumnDefinition, ColumnType, ExpectedSchema, ForeignKeyRef, Ident, Lit, MAX_IDENTIFIER_LEN,
    TableSchema, TypeKind,
};

/// The value written into existing rows before a new column becomes
/// `NOT NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// A literal, passed as a text parameter and cast to the column type.
    Literal(&'static str),
    /// A SQL expression evaluated per row.
    Expression(&'static str),
}

impl Fallback {
    pub fn for_type(column_type: &ColumnType) -> Self {
        if column_type.array {
            return Fallback::Literal("{}");
        }
        match column_type.kind {
            TypeKind::Text
            | TypeKind::Varchar
            | TypeKind::Char
            | TypeKind::Bytea
            | TypeKind::TsVector => Fallback::Literal(""),
            TypeKind::Boolean => Fallback::Literal("false"),
            TypeKind::Uuid => Fallback::Expression("gen_random_uuid()"),
            TypeKind::Json | TypeKind::Jsonb => Fallback::Literal("{}"),
            TypeKind::Inet | TypeKind::Cidr => Fallback::Literal("0.0.0.0/0"),
            TypeKind::Interval => Fallback::Literal("0"),
            kind if kind.is_temporal() => Fallback::Expression("NOW()"),
            _ => Fallback::Literal("0"),
        }
    }
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Literal(value) => write!(f, "{}", Lit(value)),
            Fallback::Expression(expr) => f.write_str(expr),
        }
    }
}

/// One statement of a column's reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    /// `ADD COLUMN` with its declared `NOT NULL` and `DEFAULT`.
    AddColumn(ColumnDefinition),
    /// `ADD COLUMN` without `NOT NULL`, first step of a backfill.
    AddNullable {
        column: String,
        column_type: ColumnType,
    },
    /// Fill existing rows that hold `NULL`.
    Backfill {
        column: String,
        column_type: ColumnType,
        fallback: Fallback,
    },
    SetNotNull { column: String },
    AddForeignKey {
        column: String,
        constraint: String,
        reference: ForeignKeyRef,
    },
}

impl ColumnChange {
    /// The statement to execute against `schema.table`, with `$1` standing
    /// for the parameter returned alongside it.
    pub fn statement(&self, schema: &str, table: &str) -> (String, Option<&'static str>) {
        let target = format!("{}.{}", Ident(schema), Ident(table));
        match self {
            ColumnChange::Backfill {
                column,
                column_type,
                fallback: Fallback::Literal(value),
            } => (
                format!(
                    "UPDATE {} SET {} = $1::text::{} WHERE {} IS NULL",
                    target,
                    Ident(column),
                    column_type.storage(),
                    Ident(column)
                ),
                Some(*value),
            ),
            other => (other.render(&target, schema), None),
        }
    }

    /// The change as a standalone SQL statement, values inlined.
    pub fn to_sql(&self, schema: &str, table: &str) -> String {
        let target = format!("{}.{}", Ident(schema), Ident(table));
        format!("{};", self.render(&target, schema))
    }

    fn render(&self, target: &str, schema: &str) -> String {
        match self {
            ColumnChange::AddColumn(col) => {
                let not_null = if col.nullable { "" } else { " NOT NULL" };
                let default = col
                    .default
                    .as_ref()
                    .map(|d| format!(" DEFAULT {}", d))
                    .unwrap_or_default();
                format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}{}{}",
                    target,
                    Ident(&col.name),
                    col.column_type,
                    not_null,
                    default
                )
            }
            ColumnChange::AddNullable {
                column,
                column_type,
            } => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                target,
                Ident(column),
                column_type
            ),
            ColumnChange::Backfill {
                column,
                column_type,
                fallback,
            } => {
                let value = match fallback {
                    Fallback::Literal(_) => format!("{}::{}", fallback, column_type.storage()),
                    Fallback::Expression(_) => fallback.to_string(),
                };
                format!(
                    "UPDATE {} SET {} = {} WHERE {} IS NULL",
                    target,
                    Ident(column),
                    value,
                    Ident(column)
                )
            }
            ColumnChange::SetNotNull { column } => format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                target,
                Ident(column)
            ),
            ColumnChange::AddForeignKey {
                column,
                constraint,
                reference,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) {}",
                target,
                Ident(constraint),
                Ident(column),
                reference.to_sql(schema)
            ),
        }
    }
}

impl fmt::Display for ColumnChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnChange::AddColumn(col) => {
                let nullable = if col.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}: {}{}", col.name, col.column_type, nullable)?;
                if let Some(default) = &col.default {
                    write!(f, " default {}", default)?;
                }
                Ok(())
            }
            ColumnChange::AddNullable {
                column,
                column_type,
            } => write!(f, "+ {}: {} (nullable)", column, column_type),
            ColumnChange::Backfill {
                column, fallback, ..
            } => write!(f, "~ {}: backfill {}", column, fallback),
            ColumnChange::SetNotNull { column } => write!(f, "~ {}: nullable -> not null", column),
            ColumnChange::AddForeignKey {
                column, reference, ..
            } => {
                write!(f, "+ FOREIGN KEY ({}) -> {}", column, reference.table)?;
                if let Some(target) = &reference.column {
                    write!(f, ".{}", target)?;
                }
                Ok(())
            }
        }
    }
}

/// What it takes to bring one missing column into existence.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub column: String,
    /// Creation statements, in order. More than one means a backfill.
    pub changes: Vec<ColumnChange>,
    /// Added after the column exists.
    pub foreign_key: Option<ColumnChange>,
}

impl ColumnPlan {
    pub fn needs_backfill(&self) -> bool {
        self.changes.len() > 1
    }
}

/// A column whose declared and live types differ. Reported, never altered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDrift {
    pub column: String,
    pub expected: ColumnType,
    pub actual: ColumnType,
}

impl fmt::Display for TypeDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: declared {}, database has {}",
            self.column, self.expected, self.actual
        )
    }
}

/// The reconciliation plan for one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TablePlan {
    pub table: String,
    /// Missing columns, in declaration order.
    pub columns: Vec<ColumnPlan>,
    pub type_drift: Vec<TypeDrift>,
}

impl TablePlan {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.type_drift.is_empty()
    }

    /// Every statement the plan would run, one per line.
    pub fn to_sql(&self, schema: &str) -> String {
        let mut sql = String::new();
        for column in &self.columns {
            for change in column.changes.iter().chain(&column.foreign_key) {
                sql.push_str(&change.to_sql(schema, &self.table));
                sql.push('\n');
            }
        }
        sql
    }
}

impl fmt::Display for TablePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.table)?;
        for column in &self.columns {
            for change in column.changes.iter().chain(&column.foreign_key) {
                writeln!(f, "  {}", change)?;
            }
        }
        for drift in &self.type_drift {
            writeln!(f, "  ! {}", drift)?;
        }
        Ok(())
    }
}

/// Foreign key constraint name for `table.column`, cut to the identifier
/// limit.
pub fn foreign_key_name(table: &str, column: &str) -> String {
    let mut name = format!("fk_{}_{}", table, column);
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut cut = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Compare a table's declared columns with its live columns.
pub fn plan_table(expected: &TableSchema, actual: &IndexMap<String, ActualColumn>) -> TablePlan {
    let mut plan = TablePlan {
        table: expected.name.clone(),
        ..Default::default()
    };

    for (name, column) in &expected.columns {
        match actual.get(name) {
            Some(live) => {
                if let Some(actual_type) = live.column_type {
                    if !column.column_type.same_storage(&actual_type) {
                        plan.type_drift.push(TypeDrift {
                            column: name.clone(),
                            expected: column.column_type,
                            actual: actual_type,
                        });
                    }
                }
            }
            None => plan.columns.push(plan_column(&expected.name, column)),
        }
    }

    plan
}

fn plan_column(table: &str, column: &ColumnDefinition) -> ColumnPlan {
    let serial = column.column_type.kind != column.column_type.kind.storage();
    let changes = if !column.nullable && column.default.is_none() && !serial {
        vec![
            ColumnChange::AddNullable {
                column: column.name.clone(),
                column_type: column.column_type,
            },
            ColumnChange::Backfill {
                column: column.name.clone(),
                column_type: column.column_type,
                fallback: Fallback::for_type(&column.column_type),
            },
            ColumnChange::SetNotNull {
                column: column.name.clone(),
            },
        ]
    } else {
        vec![ColumnChange::AddColumn(column.clone())]
    };

    let foreign_key = column
        .references
        .as_ref()
        .map(|reference| ColumnChange::AddForeignKey {
            column: column.name.clone(),
            constraint: foreign_key_name(table, &column.name),
            reference: reference.clone(),
        });

    ColumnPlan {
        column: column.name.clone(),
        changes,
        foreign_key,
    }
}

/// What reconciliation did to one table.
#[derive(Debug, Clone, Default)]
pub struct TableSyncDetail {
    pub table: String,
    pub columns_created: Vec<String>,
    pub foreign_keys_added: Vec<String>,
    pub errors: Vec<SyncError>,
    pub type_drift: Vec<TypeDrift>,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Tables present both in the sources and in the database.
    pub tables_processed: usize,
    pub columns_created: usize,
    /// Every non-fatal error, rendered.
    pub errors: Vec<String>,
    pub tables: Vec<TableSyncDetail>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Plan every expected table that exists in `schema`, without changing
/// anything.
pub async fn plan_schema<C: Connection>(
    conn: &C,
    expected: &ExpectedSchema,
    schema: &str,
) -> Result<Vec<TablePlan>> {
    let live: HashSet<String> = introspect::list_tables(conn, schema)
        .await?
        .into_iter()
        .collect();
    let mut plans = Vec::new();
    for table in expected.tables.values() {
        if !live.contains(&table.name) {
            continue;
        }
        let actual = introspect::table_columns(conn, schema, &table.name).await?;
        plans.push(plan_table(table, &actual));
    }
    Ok(plans)
}

/// Add every missing column to every expected table that exists in `schema`.
///
/// Only listing the schema's tables can fail the pass. Anything that goes
/// wrong with a single table or column is recorded in the result and the
/// pass moves on.
pub async fn sync_schema<C: Connection>(
    conn: &C,
    expected: &ExpectedSchema,
    schema: &str,
    verbose: bool,
) -> Result<SyncResult> {
    let started = Instant::now();
    let live: HashSet<String> = introspect::list_tables(conn, schema)
        .await?
        .into_iter()
        .collect();

    let mut result = SyncResult::default();
    for table in expected.tables.values() {
        if !live.contains(&table.name) {
            tracing::debug!(table = %table.name, "not in database yet, skipping sync");
            continue;
        }
        let detail = sync_table(conn, schema, table, &live, verbose).await;
        result.tables_processed += 1;
        result.columns_created += detail.columns_created.len();
        result
            .errors
            .extend(detail.errors.iter().map(ToString::to_string));
        result.tables.push(detail);
    }
    result.duration = started.elapsed();

    tracing::info!(
        tables = result.tables_processed,
        columns_created = result.columns_created,
        errors = result.errors.len(),
        duration = ?result.duration,
        "schema sync finished"
    );
    Ok(result)
}

async fn sync_table<C: Connection>(
    conn: &C,
    schema: &str,
    table: &TableSchema,
    live_tables: &HashSet<String>,
    verbose: bool,
) -> TableSyncDetail {
    let mut detail = TableSyncDetail {
        table: table.name.clone(),
        ..Default::default()
    };

    let actual = match introspect::table_columns(conn, schema, &table.name).await {
        Ok(actual) => actual,
        Err(e) => {
            detail.errors.push(SyncError::Introspect {
                table: table.name.clone(),
                message: e.to_string(),
            });
            return detail;
        }
    };

    let plan = plan_table(table, &actual);
    for drift in &plan.type_drift {
        tracing::warn!(table = %table.name, "type drift: {}", drift);
    }
    detail.type_drift = plan.type_drift.clone();

    for column in &plan.columns {
        if verbose {
            for change in &column.changes {
                tracing::info!(table = %table.name, "{}", change.to_sql(schema, &table.name));
            }
        }

        if let Err(e) = apply_column(conn, schema, &table.name, column).await {
            tracing::warn!(table = %table.name, column = %column.column, error = %e, "failed to add column");
            detail.errors.push(SyncError::Column {
                table: table.name.clone(),
                column: column.column.clone(),
                message: db_message(&e),
            });
            continue;
        }
        tracing::info!(
            table = %table.name,
            column = %column.column,
            backfilled = column.needs_backfill(),
            "added column"
        );
        detail.columns_created.push(column.column.clone());

        if let Some(fk) = &column.foreign_key {
            match apply_foreign_key(conn, schema, &table.name, fk, live_tables).await {
                Ok(Some(constraint)) => detail.foreign_keys_added.push(constraint),
                Ok(None) => {}
                Err(e) => detail.errors.push(e),
            }
        }
    }

    detail
}

/// Run a column's creation statements. A backfill runs in a transaction.
async fn apply_column<C: Connection>(
    conn: &C,
    schema: &str,
    table: &str,
    plan: &ColumnPlan,
) -> std::result::Result<(), tokio_postgres::Error> {
    let conn = conn.traced();
    if !plan.needs_backfill() {
        for change in &plan.changes {
            let (sql, _) = change.statement(schema, table);
            conn.execute(&sql, &[]).await?;
        }
        return Ok(());
    }

    conn.batch_execute("BEGIN").await?;
    let mut outcome = Ok(());
    for change in &plan.changes {
        let (sql, param) = change.statement(schema, table);
        let executed = match param {
            Some(value) => conn.execute(&sql, &[&value]).await,
            None => conn.execute(&sql, &[]).await,
        };
        if let Err(e) = executed {
            outcome = Err(e);
            break;
        }
    }

    match outcome {
        Ok(()) => conn.batch_execute("COMMIT").await,
        Err(e) => {
            if let Err(rollback) = conn.batch_execute("ROLLBACK").await {
                tracing::warn!(error = %rollback, "rollback after failed backfill also failed");
            }
            Err(e)
        }
    }
}

/// Add a foreign key unless it already exists. Returns the constraint name
/// if one was added.
async fn apply_foreign_key<C: Connection>(
    conn: &C,
    schema: &str,
    table: &str,
    fk: &ColumnChange,
    live_tables: &HashSet<String>,
) -> std::result::Result<Option<String>, SyncError> {
    let ColumnChange::AddForeignKey {
        column,
        constraint,
        reference,
    } = fk
    else {
        return Ok(None);
    };
    let fk_error = |message: String| SyncError::ForeignKey {
        table: table.to_string(),
        column: column.clone(),
        constraint: constraint.clone(),
        message,
    };

    match introspect::constraint_exists(conn, schema, constraint).await {
        Ok(true) => {
            tracing::debug!(%constraint, "foreign key already present");
            return Ok(None);
        }
        Ok(false) => {}
        Err(e) => return Err(fk_error(e.to_string())),
    }

    if !live_tables.contains(&reference.table) {
        return Err(fk_error(format!(
            "referenced table {} does not exist",
            reference.table
        )));
    }

    let (sql, _) = fk.statement(schema, table);
    match conn.traced().execute(&sql, &[]).await {
        Ok(_) => {
            tracing::info!(%table, %column, %constraint, "added foreign key");
            Ok(Some(constraint.clone()))
        }
        Err(e) => Err(fk_error(db_message(&e))),
    }
}
