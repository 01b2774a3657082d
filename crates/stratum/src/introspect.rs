//! Live catalog introspection.
//!
//! Every query casts catalog domain types (`sql_identifier`,
//! `cardinal_number`, `yes_or_no`) to plain `text`/`int4` so rows decode
//! into ordinary Rust types.
//!
//! `information_schema` reports no length or precision for array columns.
//! Those come from the element typmod in `pg_attribute`.

use crate::Result;
use crate::traced::{Connection, ConnectionExt};
use indexmap::IndexMap;
use stratum_ddl::{ColumnDefault, ColumnType};

/// A column as the database reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualColumn {
    pub name: String,
    /// `None` when the catalog type is outside the recognized vocabulary.
    pub column_type: Option<ColumnType>,
    /// The catalog's own type name, for reporting.
    pub raw_type: String,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    /// `GENERATED ... AS IDENTITY`
    pub identity: bool,
}

impl ActualColumn {
    /// Build from the raw `information_schema.columns` fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_catalog(
        name: String,
        data_type: &str,
        udt_name: &str,
        is_nullable: &str,
        column_default: Option<&str>,
        char_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
        is_identity: &str,
    ) -> Self {
        let column_type = ColumnType::from_catalog(
            data_type,
            udt_name,
            char_length,
            numeric_precision,
            numeric_scale,
        );
        let raw_type = match data_type {
            "ARRAY" => format!("{}[]", udt_name.trim_start_matches('_')),
            "USER-DEFINED" => udt_name.to_string(),
            other => other.to_string(),
        };
        Self {
            name,
            column_type,
            raw_type,
            nullable: is_nullable.eq_ignore_ascii_case("YES"),
            default: column_default.and_then(ColumnDefault::normalize),
            identity: is_identity.eq_ignore_ascii_case("YES"),
        }
    }
}

/// The columns of `schema.table`, in ordinal order. A table that does not
/// exist has no columns.
pub async fn table_columns<C: Connection>(
    conn: &C,
    schema: &str,
    table: &str,
) -> Result<IndexMap<String, ActualColumn>> {
    let rows = conn
        .traced()
        .query(
            r#"
            SELECT
                c.column_name::text,
                c.data_type::text,
                c.udt_name::text,
                c.is_nullable::text,
                c.column_default::text,
                CASE WHEN c.data_type = 'ARRAY' AND c.udt_name IN ('_varchar', '_bpchar')
                          AND a.atttypmod > 4
                     THEN a.atttypmod - 4
                     ELSE c.character_maximum_length::int4 END,
                CASE WHEN c.data_type = 'ARRAY' AND c.udt_name = '_numeric' AND a.atttypmod > 4
                     THEN ((a.atttypmod - 4) >> 16) & 65535
                     ELSE c.numeric_precision::int4 END,
                CASE WHEN c.data_type = 'ARRAY' AND c.udt_name = '_numeric' AND a.atttypmod > 4
                     THEN (a.atttypmod - 4) & 65535
                     ELSE c.numeric_scale::int4 END,
                c.is_identity::text
            FROM information_schema.columns c
            LEFT JOIN pg_catalog.pg_attribute a
                ON a.attrelid = to_regclass(format('%I.%I', c.table_schema, c.table_name))
               AND a.attname = c.column_name::name
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
            &[&schema, &table],
        )
        .await?;

    let mut columns = IndexMap::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get(0)?;
        let data_type: String = row.try_get(1)?;
        let udt_name: String = row.try_get(2)?;
        let is_nullable: String = row.try_get(3)?;
        let column_default: Option<String> = row.try_get(4)?;
        let is_identity: Option<String> = row.try_get(8)?;
        let column = ActualColumn::from_catalog(
            name,
            &data_type,
            &udt_name,
            &is_nullable,
            column_default.as_deref(),
            row.try_get(5)?,
            row.try_get(6)?,
            row.try_get(7)?,
            is_identity.as_deref().unwrap_or("NO"),
        );
        columns.insert(column.name.clone(), column);
    }
    Ok(columns)
}

/// Base tables in `schema`, sorted by name.
pub async fn list_tables<C: Connection>(conn: &C, schema: &str) -> Result<Vec<String>> {
    let rows = conn
        .traced()
        .query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[&schema],
        )
        .await?;
    rows.iter()
        .map(|row| row.try_get(0).map_err(Into::into))
        .collect()
}

pub async fn table_exists<C: Connection>(conn: &C, schema: &str, table: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2)",
        schema,
        table,
    )
    .await
}

/// Which of `tables` are absent from `schema`, in the given order.
pub async fn missing_tables<C: Connection>(
    conn: &C,
    schema: &str,
    tables: &[String],
) -> Result<Vec<String>> {
    missing(
        conn,
        "SELECT name FROM unnest($2::text[]) WITH ORDINALITY AS wanted(name, pos) \
         WHERE NOT EXISTS (SELECT 1 FROM information_schema.tables t \
                           WHERE t.table_schema = $1 AND t.table_name = wanted.name) \
         ORDER BY pos",
        schema,
        tables,
    )
    .await
}

/// Which of `functions` are absent from `schema`, in the given order.
pub async fn missing_functions<C: Connection>(
    conn: &C,
    schema: &str,
    functions: &[String],
) -> Result<Vec<String>> {
    missing(
        conn,
        "SELECT name FROM unnest($2::text[]) WITH ORDINALITY AS wanted(name, pos) \
         WHERE NOT EXISTS (SELECT 1 FROM pg_proc p \
                           JOIN pg_namespace n ON n.oid = p.pronamespace \
                           WHERE n.nspname = $1 AND p.proname = wanted.name) \
         ORDER BY pos",
        schema,
        functions,
    )
    .await
}

pub async fn view_exists<C: Connection>(conn: &C, schema: &str, view: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS (SELECT 1 FROM information_schema.views \
         WHERE table_schema = $1 AND table_name = $2)",
        schema,
        view,
    )
    .await
}

/// Whether a constraint named `name` exists anywhere in `schema`.
pub async fn constraint_exists<C: Connection>(conn: &C, schema: &str, name: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS (SELECT 1 FROM pg_constraint c \
         JOIN pg_namespace n ON n.oid = c.connamespace \
         WHERE n.nspname = $1 AND c.conname = $2)",
        schema,
        name,
    )
    .await
}

/// Which of `extensions` are not installed, in the given order.
pub async fn missing_extensions<C: Connection>(
    conn: &C,
    extensions: &[String],
) -> Result<Vec<String>> {
    let rows = conn
        .traced()
        .query(
            "SELECT name FROM unnest($1::text[]) WITH ORDINALITY AS wanted(name, pos) \
             WHERE NOT EXISTS (SELECT 1 FROM pg_extension e WHERE e.extname = wanted.name) \
             ORDER BY pos",
            &[&extensions],
        )
        .await?;
    rows.iter()
        .map(|row| row.try_get(0).map_err(Into::into))
        .collect()
}

/// Number of base tables in `schema`.
pub async fn count_tables<C: Connection>(conn: &C, schema: &str) -> Result<i64> {
    let row = conn
        .traced()
        .query_one(
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
            &[&schema],
        )
        .await?;
    Ok(row.try_get(0)?)
}

async fn exists<C: Connection>(conn: &C, sql: &str, schema: &str, name: &str) -> Result<bool> {
    let row = conn.traced().query_one(sql, &[&schema, &name]).await?;
    Ok(row.try_get(0)?)
}

async fn missing<C: Connection>(
    conn: &C,
    sql: &str,
    schema: &str,
    names: &[String],
) -> Result<Vec<String>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let rows = conn.traced().query(sql, &[&schema, &names]).await?;
    rows.iter()
        .map(|row| row.try_get(0).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_ddl::TypeKind;

    #[test]
    fn test_catalog_row_normalization() {
        let col = ActualColumn::from_catalog(
            "price".into(),
            "numeric",
            "numeric",
            "NO",
            Some("0"),
            None,
            Some(10),
            Some(2),
            "NO",
        );
        assert_eq!(col.column_type.unwrap().to_string(), "NUMERIC(10,2)");
        assert!(!col.nullable);
        assert_eq!(col.default, Some(ColumnDefault::Number("0".into())));

        let col = ActualColumn::from_catalog(
            "status".into(),
            "character varying",
            "varchar",
            "YES",
            Some("'draft'::character varying"),
            Some(20),
            None,
            None,
            "NO",
        );
        assert_eq!(col.column_type.unwrap().to_string(), "VARCHAR(20)");
        assert!(col.nullable);
        assert_eq!(col.default, Some(ColumnDefault::Text("draft".into())));

        let col = ActualColumn::from_catalog(
            "created_at".into(),
            "timestamp with time zone",
            "timestamptz",
            "YES",
            Some("now()"),
            None,
            None,
            None,
            "NO",
        );
        assert_eq!(col.column_type.unwrap().kind, TypeKind::Timestamptz);
        assert_eq!(col.default, Some(ColumnDefault::Now));
    }

    #[test]
    fn test_catalog_arrays_and_unknown_types() {
        let col = ActualColumn::from_catalog(
            "tags".into(),
            "ARRAY",
            "_text",
            "YES",
            None,
            None,
            None,
            None,
            "NO",
        );
        assert_eq!(col.column_type.unwrap().to_string(), "TEXT[]");
        assert_eq!(col.raw_type, "text[]");

        let col = ActualColumn::from_catalog(
            "email".into(),
            "USER-DEFINED",
            "citext",
            "NO",
            None,
            None,
            None,
            None,
            "NO",
        );
        assert_eq!(col.column_type, None);
        assert_eq!(col.raw_type, "citext");

        let col = ActualColumn::from_catalog(
            "id".into(),
            "bigint",
            "int8",
            "NO",
            None,
            None,
            Some(64),
            Some(0),
            "YES",
        );
        assert!(col.identity);
        assert_eq!(col.column_type.unwrap().kind, TypeKind::BigInt);
    }
}
