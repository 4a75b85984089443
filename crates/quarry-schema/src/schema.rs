//! Column, index and table descriptors.
//!
//! The same types describe a live table (filled by the introspector) and a
//! declared one (usually deserialized from JSON). The JSON shape is:
//!
//! ```json
//! {
//!   "columns": {
//!     "id": {"type": "int", "length": 10, "unsigned": true, "auto_increment": true},
//!     "name": {"type": "varchar", "length": 50, "default": ""}
//!   },
//!   "indexes": {"id": "primary_key", "name": "unique"},
//!   "auto_increment": "id",
//!   "comment": "registered users"
//! }
//! ```
//!
//! Column order in the document is the declared column order.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SyncError};

// ================================================================
// Column types
// ================================================================

const INTEGER_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

const NUMERIC_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "mediumint",
    "int",
    "integer",
    "bigint",
    "decimal",
    "numeric",
    "float",
    "double",
    "real",
    "bit",
    "bool",
    "boolean",
];

fn type_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?P<base>[A-Za-z]+)\s*(?:\((?P<len>.*)\))?(?P<mods>(?:\s+[A-Za-z]+)*)\s*$")
                .ok()
        })
        .as_ref()
}

/// A parsed column type: `int(10) unsigned` is `int`, `10`, unsigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedType {
    /// Lowercase base type.
    pub base: String,
    /// Text between the parentheses, if any.
    pub length: Option<String>,
    /// Whether the `unsigned` modifier is present.
    pub unsigned: bool,
}

/// Splits a column type string into base type, length and sign.
#[must_use]
pub fn parse_type(raw: &str) -> ParsedType {
    let raw = raw.trim();
    let captures = type_pattern().and_then(|re| re.captures(raw));
    let Some(caps) = captures else {
        return ParsedType {
            base: raw.to_lowercase(),
            length: None,
            unsigned: false,
        };
    };
    let mods = caps
        .name("mods")
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    ParsedType {
        base: caps
            .name("base")
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default(),
        length: caps
            .name("len")
            .map(|m| m.as_str().trim().to_string())
            .filter(|len| !len.is_empty()),
        unsigned: mods.split_whitespace().any(|m| m == "unsigned"),
    }
}

/// Returns `true` for integer column types.
#[must_use]
pub fn is_integer_type(base: &str) -> bool {
    INTEGER_TYPES.contains(&base)
}

/// Returns `true` for numeric column types.
#[must_use]
pub fn is_numeric_type(base: &str) -> bool {
    NUMERIC_TYPES.contains(&base)
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts strings, numbers and booleans where a textual value is expected,
/// so `"length": 50` and `"default": 0` read naturally.
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Int(i64),
        Float(f64),
        Bool(bool),
        Text(String),
    }

    Ok(Option::<Lenient>::deserialize(deserializer)?.map(|value| match value {
        Lenient::Int(n) => n.to_string(),
        Lenient::Float(x) => x.to_string(),
        Lenient::Bool(b) => String::from(if b { "1" } else { "0" }),
        Lenient::Text(s) => s,
    }))
}

/// Normalizes the spellings of `CURRENT_TIMESTAMP` servers report.
fn canonical_default(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    match lower.as_str() {
        "current_timestamp" | "current_timestamp()" | "now()" => String::from("CURRENT_TIMESTAMP"),
        _ => value.to_string(),
    }
}

// ================================================================
// Column descriptor
// ================================================================

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name. Carried by the map key in JSON.
    #[serde(skip)]
    pub name: String,
    /// Base type, e.g. `varchar`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Length, precision (`10,2`) or enum options (`'a','b'`).
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub length: Option<String>,
    /// `unsigned` modifier for numeric types.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unsigned: bool,
    /// Text collation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    /// Default value as the server reports it.
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<String>,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary: bool,
    /// Column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Whether the column is the auto-increment column.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
}

impl ColumnDescriptor {
    /// Creates a NOT NULL column of the given type.
    ///
    /// `data_type` may carry a length and modifiers: `int(10) unsigned`.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: &str) -> Self {
        let parsed = parse_type(data_type);
        Self {
            name: name.into(),
            data_type: parsed.base,
            length: parsed.length,
            unsigned: parsed.unsigned,
            ..Self::default()
        }
    }

    /// Makes the column nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the collation.
    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Marks the column as auto-increment.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// The canonical `type(length) [unsigned]` string.
    #[must_use]
    pub fn column_type(&self) -> String {
        let mut out = self.data_type.to_lowercase();
        if let Some(length) = &self.length {
            out.push('(');
            out.push_str(length);
            out.push(')');
        }
        if self.unsigned {
            out.push_str(" unsigned");
        }
        out
    }

    /// Returns `true` when the declared column has a default value.
    #[must_use]
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Returns `true` for numeric column types.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        is_numeric_type(&self.data_type.to_lowercase())
    }

    /// Folds a length or modifier written into `data_type` into the
    /// dedicated fields and drops empty comments.
    pub(crate) fn normalize(&mut self) {
        if self.data_type.contains(['(', ' ']) {
            let parsed = parse_type(&self.data_type);
            self.data_type = parsed.base;
            if self.length.is_none() {
                self.length = parsed.length;
            }
            self.unsigned |= parsed.unsigned;
        } else {
            self.data_type = self.data_type.to_lowercase();
        }
        if self.comment.as_deref().is_some_and(str::is_empty) {
            self.comment = None;
        }
        if self.length.as_deref().is_some_and(str::is_empty) {
            self.length = None;
        }
    }

    /// Lists the attributes in which the live column differs from this
    /// declared one.
    ///
    /// Integer display widths are ignored when either side omits one (MySQL
    /// 8 reports integers without a width), and collation is only compared
    /// when one is declared.
    #[must_use]
    pub fn differences(&self, live: &Self) -> Vec<&'static str> {
        let mut out = Vec::new();

        let base = self.data_type.to_lowercase();
        let type_differs = base != live.data_type.to_lowercase()
            || self.unsigned != live.unsigned
            || match (&self.length, &live.length) {
                (None, Some(_)) | (Some(_), None) => !is_integer_type(&base),
                (declared_len, live_len) => declared_len != live_len,
            };
        if type_differs {
            out.push("type");
        }

        if let Some(collation) = &self.collation {
            if live.collation.as_ref() != Some(collation) {
                out.push("collation");
            }
        }
        if self.nullable != live.nullable {
            out.push("nullable");
        }
        let declared_default = self.default.as_deref().map(canonical_default);
        let live_default = live.default.as_deref().map(canonical_default);
        if declared_default != live_default {
            out.push("default");
        }
        let declared_comment = self.comment.as_deref().filter(|c| !c.is_empty());
        let live_comment = live.comment.as_deref().filter(|c| !c.is_empty());
        if declared_comment != live_comment {
            out.push("comment");
        }
        out
    }

    /// Returns `true` when the live column matches this declared one.
    #[must_use]
    pub fn matches(&self, live: &Self) -> bool {
        self.differences(live).is_empty()
    }
}

// ================================================================
// Index descriptor
// ================================================================

/// Kind of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// The primary key.
    PrimaryKey,
    /// A unique index.
    Unique,
    /// A full-text index.
    #[serde(alias = "full_text")]
    Fulltext,
    /// A plain index.
    Index,
}

impl IndexKind {
    /// Keyword used in `ADD ... INDEX`.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::Unique => "UNIQUE INDEX",
            Self::Fulltext => "FULLTEXT INDEX",
            Self::Index => "INDEX",
        }
    }
}

/// One index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index name. The primary key is always `PRIMARY`.
    pub name: String,
    /// Index kind.
    pub kind: IndexKind,
    /// Indexed columns in index order.
    pub columns: Vec<String>,
}

impl IndexDescriptor {
    /// Creates an index named after its columns.
    #[must_use]
    pub fn new<I, S>(kind: IndexKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let name = if kind == IndexKind::PrimaryKey {
            String::from("PRIMARY")
        } else {
            columns.join("_")
        };
        Self {
            name,
            kind,
            columns,
        }
    }

    /// Sorted column set, used to compare indexes regardless of column
    /// order and name.
    #[must_use]
    pub fn column_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    /// Comma-joined sorted columns.
    #[must_use]
    pub fn key(&self) -> String {
        self.column_set().into_iter().collect::<Vec<_>>().join(",")
    }

    /// Returns `true` for the primary key.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.kind == IndexKind::PrimaryKey
    }
}

// ================================================================
// Table schema
// ================================================================

/// The shape of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in table order.
    #[serde(with = "column_map")]
    pub columns: Vec<ColumnDescriptor>,
    /// Indexes, keyed in JSON by their comma-joined columns.
    #[serde(default, with = "index_map")]
    pub indexes: Vec<IndexDescriptor>,
    /// Name of the auto-increment column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<String>,
    /// Table comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableSchema {
    /// Creates a schema from columns.
    #[must_use]
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
        .normalized()
    }

    /// Adds an index.
    #[must_use]
    pub fn index<I, S>(mut self, kind: IndexKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(IndexDescriptor::new(kind, columns));
        self.normalized()
    }

    /// Sets the table comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Parses a declared schema from JSON and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Self =
            serde_json::from_str(json).map_err(|e| SyncError::InvalidSchema(e.to_string()))?;
        let schema = schema.normalized();
        schema.validate()?;
        Ok(schema)
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column names in table order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// The primary key, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.is_primary())
    }

    /// All indexes except the primary key.
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| !i.is_primary())
    }

    /// The auto-increment column descriptor.
    #[must_use]
    pub fn auto_increment_column(&self) -> Option<&ColumnDescriptor> {
        self.auto_increment
            .as_deref()
            .and_then(|name| self.column(name))
    }

    /// Reconciles redundant fields.
    ///
    /// The table-level `auto_increment` name and the column flag are
    /// synced, column types written as `int(10) unsigned` are split, and
    /// the `primary` column flags follow the primary key index.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for column in &mut self.columns {
            column.normalize();
        }
        if self.comment.as_deref().is_some_and(str::is_empty) {
            self.comment = None;
        }

        match &self.auto_increment {
            Some(name) => {
                for column in &mut self.columns {
                    column.auto_increment = column.name == *name;
                }
            }
            None => {
                self.auto_increment = self
                    .columns
                    .iter()
                    .find(|c| c.auto_increment)
                    .map(|c| c.name.clone());
            }
        }

        if self.primary_key().is_none() {
            let flagged: Vec<String> = self
                .columns
                .iter()
                .filter(|c| c.primary)
                .map(|c| c.name.clone())
                .collect();
            if !flagged.is_empty() {
                self.indexes
                    .insert(0, IndexDescriptor::new(IndexKind::PrimaryKey, flagged));
            }
        }
        let primary: BTreeSet<String> = self
            .primary_key()
            .map(|pk| pk.columns.iter().cloned().collect())
            .unwrap_or_default();
        for column in &mut self.columns {
            column.primary = primary.contains(&column.name);
        }
        self
    }

    /// Checks that every referenced column exists and names are unique.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(SyncError::InvalidSchema(String::from("no columns")));
        }
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(SyncError::InvalidSchema(String::from("unnamed column")));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SyncError::InvalidSchema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if let Some(name) = &self.auto_increment {
            if self.column(name).is_none() {
                return Err(SyncError::InvalidSchema(format!(
                    "auto-increment column '{name}' is not declared"
                )));
            }
        }
        if self.indexes.iter().filter(|i| i.is_primary()).count() > 1 {
            return Err(SyncError::InvalidSchema(String::from(
                "more than one primary key",
            )));
        }
        for index in &self.indexes {
            if index.columns.is_empty() {
                return Err(SyncError::InvalidSchema(format!(
                    "index '{}' has no columns",
                    index.name
                )));
            }
            if let Some(missing) = index.columns.iter().find(|c| self.column(c).is_none()) {
                return Err(SyncError::InvalidSchema(format!(
                    "index '{}' references unknown column '{missing}'",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

/// Columns as a JSON object keyed by column name, in document order.
mod column_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::ColumnDescriptor;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(
        columns: &Vec<ColumnDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for column in columns {
            map.serialize_entry(&column.name, column)?;
        }
        map.end()
    }

    struct ColumnsVisitor;

    impl<'de> Visitor<'de> for ColumnsVisitor {
        type Value = Vec<ColumnDescriptor>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of column name to column definition")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut columns = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, mut column)) = access.next_entry::<String, ColumnDescriptor>()? {
                column.name = name;
                columns.push(column);
            }
            Ok(columns)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ColumnDescriptor>, D::Error> {
        deserializer.deserialize_map(ColumnsVisitor)
    }
}

/// Indexes as a JSON object of `"col_a,col_b": kind`.
mod index_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::{IndexDescriptor, IndexKind};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(
        indexes: &Vec<IndexDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(indexes.len()))?;
        for index in indexes {
            map.serialize_entry(&index.columns.join(","), &index.kind)?;
        }
        map.end()
    }

    struct IndexesVisitor;

    impl<'de> Visitor<'de> for IndexesVisitor {
        type Value = Vec<IndexDescriptor>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of comma-joined columns to index kind")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut indexes = Vec::new();
            while let Some((key, kind)) = access.next_entry::<String, IndexKind>()? {
                let columns = key
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from);
                indexes.push(IndexDescriptor::new(kind, columns));
            }
            Ok(indexes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<IndexDescriptor>, D::Error> {
        deserializer.deserialize_map(IndexesVisitor)
    }
}
