use alloy::primitives::U256;

use super::error::DbError;
use super::types::{DbRow, DbValue};

/// Which SQL dialect and value encoding the store was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

impl DbKind {
    /// 1-indexed bind placeholder.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DbKind::Sqlite => format!("?{index}"),
            DbKind::Postgres => format!("${index}"),
        }
    }

    /// Placeholder for a specific value. NUMERIC binds on PostgreSQL carry
    /// an explicit cast because the wire value is a decimal string.
    pub fn placeholder_for(&self, index: usize, value: &DbValue) -> String {
        match (self, value) {
            (DbKind::Postgres, DbValue::Numeric(_)) => format!("${index}::numeric"),
            (DbKind::Postgres, DbValue::Json(_)) => format!("${index}::json"),
            _ => self.placeholder(index),
        }
    }

    /// Select-list expression for a big-integer column, normalizing both
    /// backends to a text read.
    pub fn big_column(&self, column: &str) -> String {
        match self {
            DbKind::Sqlite => column.to_string(),
            DbKind::Postgres => format!("{column}::text AS {column}"),
        }
    }
}

// SQLite stores big integers as fixed-width zero-padded decimal strings so
// that lexicographic order equals numeric order; 20 digits covers u64 and
// 78 covers u256.
const U64_WIDTH: usize = 20;
const U256_WIDTH: usize = 78;

/// Big-integer serialization strategy, selected once at store construction.
/// No call site branches on the backend.
#[derive(Debug, Clone, Copy)]
pub struct BigEncoder {
    kind: DbKind,
}

impl BigEncoder {
    pub fn new(kind: DbKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    pub fn u64(&self, value: u64) -> DbValue {
        match self.kind {
            DbKind::Sqlite => DbValue::Text(format!("{value:0width$}", width = U64_WIDTH)),
            DbKind::Postgres => DbValue::Numeric(value.to_string()),
        }
    }

    pub fn opt_u64(&self, value: Option<u64>) -> DbValue {
        value.map(|v| self.u64(v)).unwrap_or(DbValue::Null)
    }

    pub fn u256(&self, value: U256) -> DbValue {
        match self.kind {
            DbKind::Sqlite => {
                DbValue::Text(format!("{:0>width$}", value.to_string(), width = U256_WIDTH))
            }
            DbKind::Postgres => DbValue::Numeric(value.to_string()),
        }
    }

    pub fn decode_u64(&self, text: &str) -> Result<u64, DbError> {
        let trimmed = text.trim_start_matches('0');
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed
            .parse::<u64>()
            .map_err(|e| DbError::Decode(format!("invalid big integer '{text}': {e}")))
    }

    pub fn decode_u256(&self, text: &str) -> Result<U256, DbError> {
        let trimmed = text.trim_start_matches('0');
        if trimmed.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(trimmed, 10)
            .map_err(|e| DbError::Decode(format!("invalid big integer '{text}': {e}")))
    }

    /// Read a big-integer column from a row.
    pub fn row_u64(&self, row: &DbRow, column: &str) -> Result<u64, DbError> {
        self.decode_u64(row.text(column)?)
    }

    pub fn row_opt_u64(&self, row: &DbRow, column: &str) -> Result<Option<u64>, DbError> {
        match row.opt_text(column)? {
            Some(text) => Ok(Some(self.decode_u64(text)?)),
            None => Ok(None),
        }
    }

    pub fn row_u256(&self, row: &DbRow, column: &str) -> Result<U256, DbError> {
        self.decode_u256(row.text(column)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_encoding_is_fixed_width_and_ordered() {
        let enc = BigEncoder::new(DbKind::Sqlite);
        let DbValue::Text(a) = enc.u64(99) else { panic!() };
        let DbValue::Text(b) = enc.u64(100) else { panic!() };
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(enc.decode_u64(&a).unwrap(), 99);
    }

    #[test]
    fn postgres_encoding_is_plain_decimal() {
        let enc = BigEncoder::new(DbKind::Postgres);
        assert_eq!(enc.u64(42), DbValue::Numeric("42".into()));
        assert_eq!(enc.decode_u64("42").unwrap(), 42);
    }

    #[test]
    fn u256_round_trip() {
        let enc = BigEncoder::new(DbKind::Sqlite);
        let big = U256::from(10).pow(U256::from(30));
        let DbValue::Text(text) = enc.u256(big) else { panic!() };
        assert_eq!(text.len(), 78);
        assert_eq!(enc.decode_u256(&text).unwrap(), big);
    }

    #[test]
    fn zero_decodes() {
        let enc = BigEncoder::new(DbKind::Sqlite);
        let DbValue::Text(text) = enc.u64(0) else { panic!() };
        assert_eq!(enc.decode_u64(&text).unwrap(), 0);
    }
}
