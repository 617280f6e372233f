//! Column type lookup used to route predicate values into typed indexes.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::VdbConfig;
use crate::error::RegistryResult;
use crate::types::normalize_vdb_name;

/// SQL column types the registry distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ColumnType {
    Integer,
    Real,
    Varchar,
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "integer" | "int" | "smallint" | "bigint" => Ok(Self::Integer),
            "real" | "double" | "float" | "double precision" => Ok(Self::Real),
            "varchar" | "char" | "string" | "timestamp" | "date" | "time" => Ok(Self::Varchar),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Varchar => "VARCHAR",
        };
        f.write_str(s)
    }
}

/// Source of column types for the tables of a VDB.
///
/// `Ok(None)` means the column (or table) is not declared; callers then
/// infer a type from the literal they hold.
pub trait SchemaLookup: Send + Sync {
    fn column_type(&self, vdb: &str, table: &str, column: &str) -> RegistryResult<Option<ColumnType>>;
}

/// In-memory schema built from configuration. Table and column names are
/// matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    tables: HashMap<(String, String), HashMap<String, ColumnType>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the `[[vdb.table]]` declarations of every configured VDB.
    pub fn from_config(vdbs: &[VdbConfig]) -> Self {
        let mut schema = Self::new();
        for vdb in vdbs {
            for table in &vdb.table {
                schema = schema.with_table(
                    &vdb.name,
                    &table.name,
                    table.columns.iter().map(|(c, t)| (c.as_str(), *t)),
                );
            }
        }
        schema
    }

    /// Declare (or extend) a table.
    pub fn with_table<'a>(
        mut self,
        vdb: &str,
        table: &str,
        columns: impl IntoIterator<Item = (&'a str, ColumnType)>,
    ) -> Self {
        let entry = self
            .tables
            .entry((normalize_vdb_name(vdb), table.to_lowercase()))
            .or_default();
        for (name, ty) in columns {
            entry.insert(name.to_lowercase(), ty);
        }
        self
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl SchemaLookup for StaticSchema {
    fn column_type(&self, vdb: &str, table: &str, column: &str) -> RegistryResult<Option<ColumnType>> {
        Ok(self
            .tables
            .get(&(normalize_vdb_name(vdb), table.to_lowercase()))
            .and_then(|cols| cols.get(&column.to_lowercase()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let schema = StaticSchema::new().with_table(
            "cms",
            "cpuLoad",
            [("site", ColumnType::Varchar), ("Value", ColumnType::Real)],
        );
        assert_eq!(
            schema.column_type("CMS", "CPULOAD", "SITE").unwrap(),
            Some(ColumnType::Varchar)
        );
        assert_eq!(
            schema.column_type("CMS", "cpuload", "value").unwrap(),
            Some(ColumnType::Real)
        );
        assert_eq!(schema.column_type("CMS", "cpuLoad", "other").unwrap(), None);
        assert_eq!(schema.column_type("ATLAS", "cpuLoad", "site").unwrap(), None);
    }

    #[test]
    fn parses_type_names() {
        assert_eq!("INT".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!("double".parse::<ColumnType>().unwrap(), ColumnType::Real);
        assert_eq!("VARCHAR".parse::<ColumnType>().unwrap(), ColumnType::Varchar);
        assert!("blob".parse::<ColumnType>().is_err());
        assert!(ColumnType::Real.is_numeric());
        assert!(!ColumnType::Varchar.is_numeric());
    }
}
