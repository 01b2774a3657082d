//! Schema definition sources.

use crate::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use stratum_ddl::{ExpectedSchema, ParsedSource, parse_source};

/// A named block of SQL: `CREATE TABLE IF NOT EXISTS` statements plus any
/// functions, views, indexes or triggers that go with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSource {
    pub name: String,
    pub sql: String,
}

impl SchemaSource {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Load every `*.sql` file in `dir`, ordered by file name.
    ///
    /// Sources are named by file stem, so `010_users.sql` becomes
    /// `010_users`.
    pub fn load_dir(dir: &Utf8Path) -> Result<Vec<SchemaSource>> {
        let read_err = |path: &Utf8Path| {
            let path = path.to_owned();
            move |source| Error::Source { path, source }
        };

        let mut paths: Vec<Utf8PathBuf> = Vec::new();
        for entry in dir.read_dir_utf8().map_err(read_err(dir))? {
            let entry = entry.map_err(read_err(dir))?;
            let path = entry.path();
            if path.extension() == Some("sql") && path.is_file() {
                paths.push(path.to_owned());
            }
        }
        paths.sort();

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let sql = std::fs::read_to_string(&path).map_err(read_err(&path))?;
            let name = path.file_stem().unwrap_or(path.as_str()).to_string();
            tracing::debug!(source = %name, bytes = sql.len(), "loaded schema source");
            sources.push(SchemaSource { name, sql });
        }
        Ok(sources)
    }

    pub fn parse(&self) -> ParsedSource {
        parse_source(&self.name, &self.sql)
    }
}

/// Parse every source and merge the tables, first declaration wins.
///
/// Parse warnings are logged and otherwise ignored.
pub fn expected_schema(sources: &[SchemaSource]) -> ExpectedSchema {
    let mut expected = ExpectedSchema::new();
    for source in sources {
        let parsed = source.parse();
        for warning in &parsed.warnings {
            tracing::warn!(source = %source.name, "{}", warning);
        }
        for table in parsed.tables {
            expected.add_table(table);
        }
    }
    expected
}

/// A blake3 digest over every source's name and text, in order.
pub fn checksum(sources: &[SchemaSource]) -> String {
    let mut hasher = blake3::Hasher::new();
    for source in sources {
        hasher.update(source.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.sql.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}
