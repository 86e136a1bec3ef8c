//! Cross-layer types shared with the presentation side.
//!
//! These are the only types that cross out of the data-access layer: column
//! and table metadata, condition/sort descriptors, and the fetch options
//! bundle. Everything else (pools, raw SQL) stays internal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical column type, normalized across backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColType {
    Boolean,
    #[default]
    String,
    LongString,
    Float,
    Int,
    Date,
    /// Enumerated column; the allowed literals live in [`ColDef::values`].
    List,
}

/// Column metadata produced by backend introspection.
///
/// Immutable once constructed; consumed by the UI and by the statement
/// builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColDef {
    pub name: String,
    pub pk: bool,
    pub fk: bool,
    pub precision: u32,
    pub unsigned: bool,
    pub nullable: bool,
    pub col_type: ColType,
    /// Allowed literals for [`ColType::List`] columns, empty otherwise.
    pub values: Vec<String>,
}

impl ColDef {
    /// A plain string column, the common case in tests and defaults.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for ColDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    #[default]
    Regular,
    View,
    /// A named saved query standing in for a table.
    Dummy,
}

/// A table identity as listed by a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub kind: TableKind,
    /// Literal SQL to run instead of a table scan, for [`TableKind::Dummy`].
    pub query: Option<String>,
}

impl TableDef {
    pub fn regular(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Regular,
            query: None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.name.trim().is_empty()
    }
}

impl fmt::Display for TableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Comparison operators accepted in condition fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    In,
    Nin,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// The fixed operator set, in the order the UI presents it.
    pub const ALL: [Operator; 11] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Like,
        Operator::In,
        Operator::Nin,
        Operator::IsNull,
        Operator::IsNotNull,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::Nin => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One WHERE-clause fragment.
///
/// The value is ignored for the null-test operators; for `In`/`Nin` it is a
/// comma-separated list of literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondStmt {
    pub field: ColDef,
    pub op: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A column plus a direction; an ordered sequence of these is a multi-key
/// sort with the first entry as the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOption {
    pub column: ColDef,
    pub direction: SortDirection,
}

/// Paging, sorting and filtering options for a single table fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchTableOptions {
    pub offset: i64,
    pub limit: i64,
    pub sort: Vec<SortOption>,
    pub conditions: Vec<CondStmt>,
}
