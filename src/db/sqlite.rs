use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

use super::error::DbError;
use super::types::{DbRow, DbValue};

pub fn open(path: &str) -> Result<Connection, DbError> {
    let conn = Connection::open(path)?;
    // WAL mode for concurrent read throughput.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, DbError> {
    Ok(Connection::open_in_memory()?)
}

fn bind_value(value: &DbValue) -> SqlValue {
    match value {
        DbValue::Null => SqlValue::Null,
        DbValue::Bool(v) => SqlValue::Integer(*v as i64),
        DbValue::Int64(v) => SqlValue::Integer(*v),
        DbValue::Text(v) => SqlValue::Text(v.clone()),
        DbValue::Bytes(v) => SqlValue::Blob(v.clone()),
        // The encoder never produces Numeric for SQLite, but lower it
        // sensibly if raw SQL constructs one.
        DbValue::Numeric(v) => SqlValue::Text(v.clone()),
        DbValue::Json(v) => SqlValue::Text(v.to_string()),
    }
}

fn column_value(value: ValueRef<'_>) -> DbValue {
    match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(v) => DbValue::Int64(v),
        ValueRef::Real(v) => DbValue::Text(v.to_string()),
        ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => DbValue::Bytes(v.to_vec()),
    }
}

pub fn execute(conn: &Connection, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let bound: Vec<SqlValue> = params.iter().map(bind_value).collect();
    let changed = stmt.execute(rusqlite::params_from_iter(bound))?;
    Ok(changed as u64)
}

pub fn query(conn: &Connection, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let bound: Vec<SqlValue> = params.iter().map(bind_value).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;

    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut columns = Vec::with_capacity(column_names.len());
        for (i, name) in column_names.iter().enumerate() {
            columns.push((name.clone(), column_value(row.get_ref(i)?)));
        }
        result.push(DbRow::new(columns));
    }
    Ok(result)
}
