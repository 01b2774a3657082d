//! The recognized column type vocabulary.
//!
//! Both sides of a reconciliation speak this vocabulary: the parser resolves
//! declared type text into a [`ColumnType`], and the introspector maps catalog
//! storage names (`int4`, `timestamptz`, `_text`) back into the same values.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Postgres column types stratum knows how to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// SMALLSERIAL
    SmallSerial,
    /// SERIAL
    Serial,
    /// BIGSERIAL
    BigSerial,
    /// NUMERIC / DECIMAL
    Numeric,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// BOOLEAN
    Boolean,
    /// TEXT
    Text,
    /// VARCHAR / CHARACTER VARYING
    Varchar,
    /// CHAR / CHARACTER
    Char,
    /// UUID
    Uuid,
    /// DATE
    Date,
    /// TIME WITHOUT TIME ZONE
    Time,
    /// TIME WITH TIME ZONE
    TimeTz,
    /// TIMESTAMP WITHOUT TIME ZONE
    Timestamp,
    /// TIMESTAMP WITH TIME ZONE
    Timestamptz,
    /// INTERVAL
    Interval,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// BYTEA (binary)
    Bytea,
    /// INET
    Inet,
    /// CIDR
    Cidr,
    /// TSVECTOR
    TsVector,
}

impl TypeKind {
    /// Resolve a type keyword, an alias, or a catalog storage name.
    ///
    /// Matching is case-insensitive and whitespace-insensitive, so
    /// `"double  precision"`, `"float8"` and `"DOUBLE PRECISION"` all resolve
    /// to [`TypeKind::DoublePrecision`].
    pub fn from_keyword(word: &str) -> Option<Self> {
        let normalized = word
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "smallint" | "int2" => TypeKind::SmallInt,
            "integer" | "int" | "int4" => TypeKind::Integer,
            "bigint" | "int8" => TypeKind::BigInt,
            "smallserial" | "serial2" => TypeKind::SmallSerial,
            "serial" | "serial4" => TypeKind::Serial,
            "bigserial" | "serial8" => TypeKind::BigSerial,
            "numeric" | "decimal" => TypeKind::Numeric,
            "real" | "float4" => TypeKind::Real,
            "double precision" | "float8" | "float" => TypeKind::DoublePrecision,
            "boolean" | "bool" => TypeKind::Boolean,
            "text" => TypeKind::Text,
            "varchar" | "character varying" | "char varying" => TypeKind::Varchar,
            "char" | "character" | "bpchar" => TypeKind::Char,
            "uuid" => TypeKind::Uuid,
            "date" => TypeKind::Date,
            "time" | "time without time zone" => TypeKind::Time,
            "timetz" | "time with time zone" => TypeKind::TimeTz,
            "timestamp" | "timestamp without time zone" => TypeKind::Timestamp,
            "timestamptz" | "timestamp with time zone" => TypeKind::Timestamptz,
            "interval" => TypeKind::Interval,
            "json" => TypeKind::Json,
            "jsonb" => TypeKind::Jsonb,
            "bytea" => TypeKind::Bytea,
            "inet" => TypeKind::Inet,
            "cidr" => TypeKind::Cidr,
            "tsvector" => TypeKind::TsVector,
            _ => return None,
        };
        Some(kind)
    }

    /// The canonical SQL spelling.
    pub fn sql_name(&self) -> &'static str {
        match self {
            TypeKind::SmallInt => "SMALLINT",
            TypeKind::Integer => "INTEGER",
            TypeKind::BigInt => "BIGINT",
            TypeKind::SmallSerial => "SMALLSERIAL",
            TypeKind::Serial => "SERIAL",
            TypeKind::BigSerial => "BIGSERIAL",
            TypeKind::Numeric => "NUMERIC",
            TypeKind::Real => "REAL",
            TypeKind::DoublePrecision => "DOUBLE PRECISION",
            TypeKind::Boolean => "BOOLEAN",
            TypeKind::Text => "TEXT",
            TypeKind::Varchar => "VARCHAR",
            TypeKind::Char => "CHAR",
            TypeKind::Uuid => "UUID",
            TypeKind::Date => "DATE",
            TypeKind::Time => "TIME",
            TypeKind::TimeTz => "TIME WITH TIME ZONE",
            TypeKind::Timestamp => "TIMESTAMP",
            TypeKind::Timestamptz => "TIMESTAMP WITH TIME ZONE",
            TypeKind::Interval => "INTERVAL",
            TypeKind::Json => "JSON",
            TypeKind::Jsonb => "JSONB",
            TypeKind::Bytea => "BYTEA",
            TypeKind::Inet => "INET",
            TypeKind::Cidr => "CIDR",
            TypeKind::TsVector => "TSVECTOR",
        }
    }

    /// The type the catalog reports for a column declared with this kind.
    ///
    /// Serial types are sugar for an integer column plus a sequence default.
    pub fn storage(&self) -> TypeKind {
        match self {
            TypeKind::SmallSerial => TypeKind::SmallInt,
            TypeKind::Serial => TypeKind::Integer,
            TypeKind::BigSerial => TypeKind::BigInt,
            other => *other,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            TypeKind::Text | TypeKind::Varchar | TypeKind::Char | TypeKind::TsVector
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeKind::SmallInt
                | TypeKind::Integer
                | TypeKind::BigInt
                | TypeKind::SmallSerial
                | TypeKind::Serial
                | TypeKind::BigSerial
                | TypeKind::Numeric
                | TypeKind::Real
                | TypeKind::DoublePrecision
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            TypeKind::Date
                | TypeKind::Time
                | TypeKind::TimeTz
                | TypeKind::Timestamp
                | TypeKind::Timestamptz
        )
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A type argument list: `(n)` or `(p,s)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeModifier {
    /// `VARCHAR(255)`, `NUMERIC(10)`, `TIMESTAMP(3)`
    Size(u32),
    /// `NUMERIC(10,2)`
    PrecisionScale(u32, u32),
}

impl fmt::Display for TypeModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeModifier::Size(n) => write!(f, "({})", n),
            TypeModifier::PrecisionScale(p, s) => write!(f, "({},{})", p, s),
        }
    }
}

/// A fully resolved column type: kind, optional modifier, array flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub kind: TypeKind,
    pub modifier: Option<TypeModifier>,
    pub array: bool,
}

impl ColumnType {
    /// Build a normalized type.
    ///
    /// `NUMERIC(p)` becomes `NUMERIC(p,0)` and a bare `CHAR` becomes
    /// `CHAR(1)`, which is what Postgres stores for both.
    pub fn new(kind: TypeKind, modifier: Option<TypeModifier>, array: bool) -> Self {
        let modifier = match (kind, modifier) {
            (TypeKind::Numeric, Some(TypeModifier::Size(p))) => {
                Some(TypeModifier::PrecisionScale(p, 0))
            }
            (TypeKind::Char, None) => Some(TypeModifier::Size(1)),
            (_, modifier) => modifier,
        };
        Self {
            kind,
            modifier,
            array,
        }
    }

    /// A plain, unmodified, non-array type.
    pub fn simple(kind: TypeKind) -> Self {
        Self::new(kind, None, false)
    }

    /// Resolve the type at the start of a column clause remainder
    /// (everything after the column name).
    ///
    /// Returns the type and the byte length of the text it consumed, or
    /// `None` if no pattern produced a recognized type.
    pub fn resolve(text: &str) -> Option<(Self, usize)> {
        let trimmed = text.trim_start();
        let offset = text.len() - trimmed.len();
        TYPE_PATTERNS.iter().find_map(|pattern| {
            let caps = pattern.regex.captures(trimmed)?;
            let (keyword, modifier) = pattern.shape.extract(&caps)?;
            let kind = TypeKind::from_keyword(&keyword)?;
            let mut end = caps.get(0)?.end();
            let array = match ARRAY_SUFFIX.find(&trimmed[end..]) {
                Some(m) => {
                    end += m.end();
                    true
                }
                None => false,
            };
            Some((Self::new(kind, modifier, array), offset + end))
        })
    }

    /// Map catalog metadata (`information_schema.columns`) into the
    /// vocabulary.
    ///
    /// `data_type` is the SQL-standard name (`ARRAY`, `USER-DEFINED`,
    /// `numeric`), `udt_name` the storage name (`_int4`, `numeric`). For
    /// arrays the length, precision and scale describe the element. Returns
    /// `None` for types outside the vocabulary.
    pub fn from_catalog(
        data_type: &str,
        udt_name: &str,
        char_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
    ) -> Option<Self> {
        let array = data_type.eq_ignore_ascii_case("ARRAY");
        let kind = if array {
            TypeKind::from_keyword(udt_name.strip_prefix('_').unwrap_or(udt_name))?
        } else {
            TypeKind::from_keyword(udt_name).or_else(|| TypeKind::from_keyword(data_type))?
        };

        let to_u32 = |v: Option<i32>| v.and_then(|v| u32::try_from(v).ok());
        let modifier = match kind {
            TypeKind::Numeric => match (to_u32(numeric_precision), to_u32(numeric_scale)) {
                (Some(p), Some(s)) => Some(TypeModifier::PrecisionScale(p, s)),
                (Some(p), None) => Some(TypeModifier::Size(p)),
                _ => None,
            },
            TypeKind::Varchar | TypeKind::Char => to_u32(char_length).map(TypeModifier::Size),
            _ => None,
        };
        Some(Self::new(kind, modifier, array))
    }

    /// Whether two types describe the same storage, treating serial types as
    /// their underlying integer.
    ///
    /// Modifiers only count for `NUMERIC`, `VARCHAR` and `CHAR`; the catalog
    /// does not report the others the way they are declared.
    pub fn same_storage(&self, other: &ColumnType) -> bool {
        let modifiers_match = match self.kind {
            TypeKind::Numeric | TypeKind::Varchar | TypeKind::Char => {
                self.modifier == other.modifier
            }
            _ => true,
        };
        self.kind.storage() == other.kind.storage() && modifiers_match && self.array == other.array
    }

    /// The type to name in a cast. Serial types are not real types outside
    /// column definitions.
    pub fn storage(&self) -> ColumnType {
        ColumnType {
            kind: self.kind.storage(),
            ..*self
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.modifier) {
            // Precision sits before the zone qualifier.
            (TypeKind::Timestamptz, Some(m)) => write!(f, "TIMESTAMP{} WITH TIME ZONE", m)?,
            (TypeKind::TimeTz, Some(m)) => write!(f, "TIME{} WITH TIME ZONE", m)?,
            (kind, Some(m)) => write!(f, "{}{}", kind, m)?,
            (kind, None) => write!(f, "{}", kind)?,
        }
        if self.array {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// How a pattern's capture groups map to a keyword and modifier.
enum Shape {
    /// Group 1 is the keyword.
    Keyword,
    /// Group 1 is the keyword, group 2 a size.
    Sized,
    /// Group 1 is the keyword, groups 2 and 3 precision and scale.
    PrecisionScale,
    /// Group 1 is `TIMESTAMP`/`TIME`, group 2 an optional precision, group 3
    /// `WITH`/`WITHOUT`.
    Zoned,
    /// Group 1 is a keyword, group 2 an optional size.
    OptionallySized,
}

impl Shape {
    fn extract(&self, caps: &regex::Captures<'_>) -> Option<(String, Option<TypeModifier>)> {
        let group = |i: usize| caps.get(i).map(|m| m.as_str());
        let number = |i: usize| group(i).and_then(|s| s.parse::<u32>().ok());
        Some(match self {
            Shape::Keyword => (group(1)?.to_string(), None),
            Shape::Sized => (group(1)?.to_string(), Some(TypeModifier::Size(number(2)?))),
            Shape::PrecisionScale => (
                group(1)?.to_string(),
                Some(TypeModifier::PrecisionScale(number(2)?, number(3)?)),
            ),
            Shape::Zoned => (
                format!("{} {} time zone", group(1)?, group(3)?),
                number(2).map(TypeModifier::Size),
            ),
            Shape::OptionallySized => (group(1)?.to_string(), number(2).map(TypeModifier::Size)),
        })
    }
}

struct TypePattern {
    regex: Regex,
    shape: Shape,
}

/// Type patterns, most specific first. The first pattern that matches and
/// resolves to a known keyword wins.
static TYPE_PATTERNS: LazyLock<Vec<TypePattern>> = LazyLock::new(|| {
    let pattern = |re: &str, shape: Shape| TypePattern {
        regex: Regex::new(&format!("(?i)^{}", re)).expect("type pattern is a valid regex"),
        shape,
    };
    vec![
        pattern(
            r"(timestamp|time)\s*(?:\(\s*(\d+)\s*\))?\s+(with|without)\s+time\s+zone\b",
            Shape::Zoned,
        ),
        pattern(r"(double\s+precision)\b", Shape::Keyword),
        pattern(
            r"(character\s+varying|char\s+varying)\s*(?:\(\s*(\d+)\s*\))?",
            Shape::OptionallySized,
        ),
        pattern(
            r"(numeric|decimal)\s*\(\s*(\d+)\s*,\s*(\d+)\s*\)",
            Shape::PrecisionScale,
        ),
        pattern(r"(numeric|decimal)\s*\(\s*(\d+)\s*\)", Shape::Sized),
        pattern(r"(varchar|character|char)\s*\(\s*(\d+)\s*\)", Shape::Sized),
        pattern(r"([a-z_][a-z0-9_]*)\s*\(\s*(\d+)\s*\)", Shape::Sized),
        pattern(r"([a-z_][a-z0-9_]*)\b", Shape::Keyword),
    ]
});

/// An `[]` array suffix, checked after any pattern matches.
static ARRAY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\s*\]").expect("array suffix is a valid regex"));
