use serde::Serialize;
use serde_json::Value as JsonValue;

use super::error::DbError;

/// A value that can be bound to or read from either backend.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int64(i64),
    /// Text (unlimited length)
    Text(String),
    /// Raw bytes (BYTEA / BLOB)
    Bytes(Vec<u8>),
    /// Decimal string for values wider than i64. Bound as native NUMERIC on
    /// PostgreSQL; the SQLite backend never constructs this variant (the
    /// encoder produces fixed-width `Text` instead).
    Numeric(String),
    /// JSON value (JSON column on PostgreSQL, TEXT on SQLite)
    Json(JsonValue),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// Create a JSON value from any serializable type.
    pub fn json<T: Serialize>(value: T) -> Self {
        DbValue::Json(serde_json::to_value(value).expect("failed to serialize to JSON"))
    }

    pub fn opt_bytes(bytes: Option<impl AsRef<[u8]>>) -> Self {
        match bytes {
            Some(b) => DbValue::Bytes(b.as_ref().to_vec()),
            None => DbValue::Null,
        }
    }

    pub fn opt_text(text: Option<String>) -> Self {
        match text {
            Some(t) => DbValue::Text(t),
            None => DbValue::Null,
        }
    }
}

/// One result row, decoded into `DbValue`s at fetch time so callers never
/// see backend row types.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<(String, DbValue)>,
}

impl DbRow {
    pub fn new(columns: Vec<(String, DbValue)>) -> Self {
        Self { columns }
    }

    pub fn value(&self, name: &str) -> Result<&DbValue, DbError> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
            .ok_or_else(|| DbError::Decode(format!("missing column '{name}'")))
    }

    pub fn text(&self, name: &str) -> Result<&str, DbError> {
        match self.value(name)? {
            DbValue::Text(s) | DbValue::Numeric(s) => Ok(s),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not text: {other:?}"
            ))),
        }
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<&str>, DbError> {
        match self.value(name)? {
            DbValue::Null => Ok(None),
            DbValue::Text(s) | DbValue::Numeric(s) => Ok(Some(s)),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not text: {other:?}"
            ))),
        }
    }

    pub fn i64(&self, name: &str) -> Result<i64, DbError> {
        match self.value(name)? {
            DbValue::Int64(v) => Ok(*v),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not an integer: {other:?}"
            ))),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, DbError> {
        match self.value(name)? {
            DbValue::Bool(v) => Ok(*v),
            // SQLite has no boolean affinity; 0/1 integers come back.
            DbValue::Int64(v) => Ok(*v != 0),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not a boolean: {other:?}"
            ))),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8], DbError> {
        match self.value(name)? {
            DbValue::Bytes(b) => Ok(b),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not bytes: {other:?}"
            ))),
        }
    }

    pub fn opt_bytes(&self, name: &str) -> Result<Option<&[u8]>, DbError> {
        match self.value(name)? {
            DbValue::Null => Ok(None),
            DbValue::Bytes(b) => Ok(Some(b)),
            other => Err(DbError::Decode(format!(
                "column '{name}' is not bytes: {other:?}"
            ))),
        }
    }
}

/// A write operation executed inside a batch transaction.
#[derive(Debug, Clone)]
pub enum DbOperation {
    /// INSERT with ON CONFLICT DO UPDATE (upsert)
    Upsert {
        table: String,
        columns: Vec<String>,
        values: Vec<DbValue>,
        /// Columns that form the unique constraint
        conflict_columns: Vec<String>,
        /// Columns to update on conflict; empty means DO NOTHING
        update_columns: Vec<String>,
    },
    /// Simple INSERT
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<DbValue>,
    },
    /// DELETE with WHERE clause
    Delete {
        table: String,
        where_clause: WhereClause,
    },
    /// Raw SQL for complex operations (use sparingly)
    RawSql { query: String, params: Vec<DbValue> },
}

/// WHERE clause for DELETE operations.
#[derive(Debug, Clone)]
pub enum WhereClause {
    /// column = value
    Eq(String, DbValue),
    /// column1 = value1 AND column2 = value2 AND ...
    And(Vec<(String, DbValue)>),
    /// Raw SQL condition with parameters
    Raw {
        condition: String,
        params: Vec<DbValue>,
    },
}
