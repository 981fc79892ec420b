pub mod encoding;
pub mod error;
pub mod postgres;
pub mod sql;
pub mod sqlite;
pub mod types;

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_postgres::types::ToSql;

pub use encoding::{BigEncoder, DbKind};
pub use error::DbError;
pub use types::{DbOperation, DbRow, DbValue, WhereClause};

use sql::operation_sql;

/// A handle to either backend. All store SQL goes through `execute` /
/// `query` / `begin`, so callers never see `tokio_postgres` or `rusqlite`
/// types.
#[derive(Clone)]
pub struct Db {
    kind: DbKind,
    inner: DbInner,
}

#[derive(Clone)]
enum DbInner {
    Postgres(deadpool_postgres::Pool),
    // One shared connection behind an async mutex. SQLite statements are
    // executed inline: they are in-process and the store's statements are
    // small.
    Sqlite(Arc<Mutex<rusqlite::Connection>>),
}

impl Db {
    pub async fn connect_postgres(connection_string: &str) -> Result<Self, DbError> {
        let pool = postgres::build_pool(connection_string)?;
        // Fail fast on an unreachable database.
        let _conn = pool.get().await?;
        tracing::info!("Database connection pool created successfully");

        Ok(Self {
            kind: DbKind::Postgres,
            inner: DbInner::Postgres(pool),
        })
    }

    pub fn open_sqlite(path: &str) -> Result<Self, DbError> {
        let conn = sqlite::open(path)?;
        Ok(Self {
            kind: DbKind::Sqlite,
            inner: DbInner::Sqlite(Arc::new(Mutex::new(conn))),
        })
    }

    /// In-memory SQLite database; all data is lost on drop. For tests.
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = sqlite::open_in_memory()?;
        Ok(Self {
            kind: DbKind::Sqlite,
            inner: DbInner::Sqlite(Arc::new(Mutex::new(conn))),
        })
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    pub fn encoder(&self) -> BigEncoder {
        BigEncoder::new(self.kind)
    }

    pub async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        match &self.inner {
            DbInner::Postgres(pool) => {
                let client = pool.get().await?;
                let bound = postgres::convert_params(params);
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                Ok(client.execute(sql, &refs[..]).await?)
            }
            DbInner::Sqlite(conn) => {
                let conn = conn.lock().await;
                sqlite::execute(&conn, sql, params)
            }
        }
    }

    /// Execute several statements separated by `;` without parameters
    /// (schema setup).
    pub async fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        match &self.inner {
            DbInner::Postgres(pool) => {
                let client = pool.get().await?;
                client.batch_execute(sql).await?;
                Ok(())
            }
            DbInner::Sqlite(conn) => {
                let conn = conn.lock().await;
                conn.execute_batch(sql)?;
                Ok(())
            }
        }
    }

    pub async fn query(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        match &self.inner {
            DbInner::Postgres(pool) => {
                let client = pool.get().await?;
                let bound = postgres::convert_params(params);
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                let rows = client.query(sql, &refs[..]).await?;
                rows.iter().map(postgres::convert_row).collect()
            }
            DbInner::Sqlite(conn) => {
                let conn = conn.lock().await;
                sqlite::query(&conn, sql, params)
            }
        }
    }

    /// Start a transaction on a dedicated connection. The handle must be
    /// resolved with `commit` or `rollback`.
    pub async fn begin(&self) -> Result<DbTransaction, DbError> {
        match &self.inner {
            DbInner::Postgres(pool) => {
                let client = pool.get().await?;
                client.batch_execute("BEGIN").await?;
                Ok(DbTransaction {
                    kind: self.kind,
                    inner: TxInner::Postgres(client),
                })
            }
            DbInner::Sqlite(conn) => {
                // Holding the guard for the lifetime of the transaction
                // keeps other tasks from interleaving statements into it.
                let guard = conn.clone().lock_owned().await;
                guard.execute_batch("BEGIN IMMEDIATE")?;
                Ok(DbTransaction {
                    kind: self.kind,
                    inner: TxInner::Sqlite(guard),
                })
            }
        }
    }

    /// Apply a batch of write operations in one transaction.
    pub async fn execute_transaction(&self, operations: Vec<DbOperation>) -> Result<(), DbError> {
        if operations.is_empty() {
            return Ok(());
        }

        let tx = self.begin().await?;
        for op in &operations {
            let (sql, params) = operation_sql(self.kind, op);
            if let Err(e) = tx.execute(&sql, &params).await {
                tracing::error!("SQL execution failed: {}\nSQL: {}", e, sql);
                tx.rollback().await?;
                return Err(e);
            }
        }
        tx.commit().await
    }
}

enum TxInner {
    Postgres(deadpool_postgres::Object),
    Sqlite(OwnedMutexGuard<rusqlite::Connection>),
}

pub struct DbTransaction {
    kind: DbKind,
    inner: TxInner,
}

// DbTransaction is never cloned, stored behind an `Arc`, or otherwise
// shared: each instance is owned exclusively by the async call chain that
// created it via `Db::begin`, so `&DbTransaction` is never actually
// accessed from more than one thread at a time. The `Sqlite` variant's
// `OwnedMutexGuard<rusqlite::Connection>` is the only reason this isn't
// auto-derived (rusqlite's internal statement cache uses `RefCell`); the
// mutex guard itself already guarantees exclusive access.
unsafe impl Sync for DbTransaction {}

impl DbTransaction {
    pub fn kind(&self) -> DbKind {
        self.kind
    }

    pub async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, DbError> {
        match &self.inner {
            TxInner::Postgres(client) => {
                let bound = postgres::convert_params(params);
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                Ok(client.execute(sql, &refs[..]).await?)
            }
            TxInner::Sqlite(conn) => sqlite::execute(conn, sql, params),
        }
    }

    pub async fn query(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        match &self.inner {
            TxInner::Postgres(client) => {
                let bound = postgres::convert_params(params);
                let refs: Vec<&(dyn ToSql + Sync)> =
                    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                let rows = client.query(sql, &refs[..]).await?;
                rows.iter().map(postgres::convert_row).collect()
            }
            TxInner::Sqlite(conn) => sqlite::query(conn, sql, params),
        }
    }

    pub async fn apply(&self, op: &DbOperation) -> Result<u64, DbError> {
        let (sql, params) = operation_sql(self.kind, op);
        self.execute(&sql, &params).await
    }

    pub async fn commit(self) -> Result<(), DbError> {
        match self.inner {
            TxInner::Postgres(client) => {
                client.batch_execute("COMMIT").await?;
                Ok(())
            }
            TxInner::Sqlite(conn) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
        }
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        match self.inner {
            TxInner::Postgres(client) => {
                client.batch_execute("ROLLBACK").await?;
                Ok(())
            }
            TxInner::Sqlite(conn) => {
                conn.execute_batch("ROLLBACK")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_execute_and_query() {
        let db = Db::in_memory().unwrap();
        db.batch_execute("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER)")
            .await
            .unwrap();

        db.execute(
            "INSERT INTO t (id, n) VALUES (?1, ?2)",
            &[DbValue::Text("a".into()), DbValue::Int64(7)],
        )
        .await
        .unwrap();

        let rows = db
            .query("SELECT id, n FROM t WHERE id = ?1", &[DbValue::Text("a".into())])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("id").unwrap(), "a");
        assert_eq!(rows[0].i64("n").unwrap(), 7);
    }

    #[tokio::test]
    async fn transaction_rollback_discards_writes() {
        let db = Db::in_memory().unwrap();
        db.batch_execute("CREATE TABLE t (id TEXT PRIMARY KEY)").await.unwrap();

        let tx = db.begin().await.unwrap();
        tx.execute("INSERT INTO t (id) VALUES (?1)", &[DbValue::Text("x".into())])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let rows = db.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn execute_transaction_applies_upserts_idempotently() {
        let db = Db::in_memory().unwrap();
        db.batch_execute("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER)")
            .await
            .unwrap();

        let op = DbOperation::Upsert {
            table: "t".into(),
            columns: vec!["id".into(), "n".into()],
            values: vec![DbValue::Text("k".into()), DbValue::Int64(1)],
            conflict_columns: vec!["id".into()],
            update_columns: vec!["n".into()],
        };
        db.execute_transaction(vec![op.clone()]).await.unwrap();
        db.execute_transaction(vec![op]).await.unwrap();

        let rows = db.query("SELECT n FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].i64("n").unwrap(), 1);
    }
}
