//! Expected schema model: what the sources declare.

use crate::{ColumnDefault, ColumnType};
use indexmap::IndexMap;
use indexmap::map::Entry;

/// A foreign key reference declared inline on a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table, without schema qualifier or quotes.
    pub table: String,
    /// Referenced column. `None` when the clause omits it, which means the
    /// referenced table's primary key.
    pub column: Option<String>,
    /// `ON DELETE` action, e.g. `CASCADE`.
    pub on_delete: Option<String>,
    /// `ON UPDATE` action.
    pub on_update: Option<String>,
}

impl ForeignKeyRef {
    /// Render as the tail of an `ADD CONSTRAINT ... FOREIGN KEY (...)`
    /// statement: `REFERENCES "public"."t" ("c") ON DELETE CASCADE`.
    ///
    /// The referenced table is resolved in `schema`.
    pub fn to_sql(&self, schema: &str) -> String {
        let mut sql = format!(
            "REFERENCES {}.{}",
            crate::quote_ident(schema),
            crate::quote_ident(&self.table)
        );
        if let Some(column) = &self.column {
            sql.push_str(&format!(" ({})", crate::quote_ident(column)));
        }
        if let Some(action) = &self.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action));
        }
        if let Some(action) = &self.on_update {
            sql.push_str(&format!(" ON UPDATE {}", action));
        }
        sql
    }
}

/// A column as declared in a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    /// True unless the clause says `NOT NULL`.
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    /// Bare `UNIQUE` on the column.
    pub unique: bool,
    /// `PRIMARY KEY` on the column.
    pub primary_key: bool,
    pub references: Option<ForeignKeyRef>,
}

impl ColumnDefinition {
    /// A nullable column with no constraints.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            unique: false,
            primary_key: false,
            references: None,
        }
    }
}

/// The columns one or more sources declare for a table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: IndexMap<String, ColumnDefinition>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }

    /// Add a column unless one with the same name is already present.
    ///
    /// Returns false if the column was a duplicate and got ignored.
    pub fn insert_first_seen(&mut self, column: ColumnDefinition) -> bool {
        match self.columns.entry(column.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(column);
                true
            }
        }
    }

    /// Merge another declaration of the same table into this one.
    pub fn merge(&mut self, other: TableSchema) {
        for (_, column) in other.columns {
            self.insert_first_seen(column);
        }
    }
}

/// Every table the sources declare, keyed by table name in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpectedSchema {
    pub tables: IndexMap<String, TableSchema>,
}

impl ExpectedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a table declaration. For a column declared more than once
    /// across sources, the first declaration wins.
    pub fn add_table(&mut self, table: TableSchema) {
        match self.tables.entry(table.name.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(table),
            Entry::Vacant(slot) => {
                slot.insert(table);
            }
        }
    }

    /// Build from tables in source order.
    pub fn from_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        let mut schema = Self::new();
        for table in tables {
            schema.add_table(table);
        }
        schema
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
