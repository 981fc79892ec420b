use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// The interval index for one filter fragment could not be merged below
    /// the row cap. Coverage bookkeeping is no longer trustworthy; the
    /// process must exit.
    #[error(
        "Interval index for fragment '{fragment_id}' exceeded {max} rows and cannot be merged; \
         the sync store is unrecoverably fragmented"
    )]
    FragmentationLimit { fragment_id: String, max: usize },

    #[error("Row decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// Fragmentation is the one store error the supervisor must not retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::FragmentationLimit { .. })
    }
}
