use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::{Db, DbValue};

use super::error::StoreError;

/// Publicly observable indexer status, one entry per chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status(pub HashMap<u64, ChainStatus>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub block: StatusBlock,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBlock {
    pub number: u64,
    pub timestamp: u64,
}

/// Singleton key-value area in `_chainsync_meta`. JSON text on SQLite,
/// native JSON on PostgreSQL; the db layer handles the difference.
pub struct MetadataStore {
    db: Db,
}

impl MetadataStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_status(&self) -> Result<Option<Status>, StoreError> {
        let sql = format!(
            "SELECT value FROM _chainsync_meta WHERE key = {p1}",
            p1 = self.db.kind().placeholder(1),
        );
        let rows = self.db.query(&sql, &[DbValue::Text("status".into())]).await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let status = match row.value("value")? {
            DbValue::Json(json) => serde_json::from_value(json.clone())
                .map_err(|e| StoreError::Decode(format!("invalid status JSON: {e}")))?,
            DbValue::Text(text) => serde_json::from_str(text)
                .map_err(|e| StoreError::Decode(format!("invalid status JSON: {e}")))?,
            DbValue::Null => return Ok(None),
            other => {
                return Err(StoreError::Decode(format!(
                    "unexpected status column value: {other:?}"
                )))
            }
        };
        Ok(Some(status))
    }

    pub async fn set_status(&self, status: &Status) -> Result<(), StoreError> {
        let value = DbValue::json(status);
        let sql = format!(
            "INSERT INTO _chainsync_meta (key, value) VALUES ({p1}, {p2}) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            p1 = self.db.kind().placeholder(1),
            p2 = self.db.kind().placeholder_for(2, &value),
        );
        self.db
            .execute(&sql, &[DbValue::Text("status".into()), value])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;

    #[tokio::test]
    async fn status_round_trip() {
        let db = Db::in_memory().unwrap();
        schema::migrate(&db).await.unwrap();
        let store = MetadataStore::new(db);

        assert_eq!(store.get_status().await.unwrap(), None);

        let mut status = Status::default();
        status.0.insert(
            1,
            ChainStatus {
                block: StatusBlock {
                    number: 19_000_000,
                    timestamp: 1_700_000_000,
                },
                ready: true,
            },
        );
        store.set_status(&status).await.unwrap();
        assert_eq!(store.get_status().await.unwrap(), Some(status.clone()));

        // Overwrite wins.
        status.0.get_mut(&1).unwrap().ready = false;
        store.set_status(&status).await.unwrap();
        assert_eq!(store.get_status().await.unwrap(), Some(status));
    }
}
