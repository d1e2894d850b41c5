// Statement results as produced by the runner
use crate::models::request::FetchMode;
use crate::models::value::PortableValue;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Column metadata reported by the engine for one result set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Not unique: engines allow `SELECT 1 AS a, 2 AS a`
    pub name: String,
    pub ordinal: usize,
    /// Declared native type name as the engine spells it
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ordinal: usize, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal,
            type_name: type_name.into(),
            nullable: None,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Descriptor for the elements of an array column
    pub fn element_of(&self, element_type: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            ordinal: self.ordinal,
            type_name: element_type.into(),
            nullable: Some(true),
        }
    }
}

/// One row as an ordered name -> value mapping.
///
/// A repeated column name overwrites the earlier value but keeps the
/// position of its first occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    entries: Vec<(String, PortableValue)>,
}

impl RowRecord {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Returns true when `name` was already present and got replaced
    pub fn insert(&mut self, name: &str, value: PortableValue) -> bool {
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| key == name) {
            slot.1 = value;
            return true;
        }
        self.entries.push((name.to_string(), value));
        false
    }

    pub fn get(&self, name: &str) -> Option<&PortableValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PortableValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Outcome of one statement in a (possibly multi-statement) invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub columns: Vec<ColumnDescriptor>,
    /// Rows kept in memory (FETCH)
    pub rows: Vec<RowRecord>,
    /// First row (FETCH_ONE)
    pub row: Option<RowRecord>,
    /// Rows produced by the statement, whatever the fetch mode kept
    pub row_count: u64,
    /// Update count of DML/DDL statements
    pub affected_rows: Option<u64>,
    /// Staged file holding the rows (STORE)
    pub uri: Option<String>,
}

impl StatementResult {
    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Report of the trailing after-SQL statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterSqlReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All statement results of one invocation, in source order
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub results: Vec<StatementResult>,
    pub fetch_mode: FetchMode,
    pub after_sql: Option<AfterSqlReport>,
}

impl QueryOutcome {
    pub fn new(fetch_mode: FetchMode) -> Self {
        Self {
            results: Vec::new(),
            fetch_mode,
            after_sql: None,
        }
    }

    /// Rows produced across every statement
    pub fn total_rows(&self) -> u64 {
        self.results.iter().map(|result| result.row_count).sum()
    }

    pub fn last(&self) -> Option<&StatementResult> {
        self.results.last()
    }
}
