pub mod events;
pub mod historical;
pub mod realtime;
pub mod supervisor;

use thiserror::Error;

use crate::rpc::RpcError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error(
        "Reorg on chain {chain_id} reaches below the finalized block {finalized_block}; \
         refusing to rewrite finalized history"
    )]
    ReorgBeyondFinality { chain_id: u64, finalized_block: u64 },

    #[error("Sync was killed")]
    Killed,
}

impl SyncError {
    /// Errors that must terminate the process rather than the current task.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_fatal(),
            SyncError::ReorgBeyondFinality { .. } => true,
            _ => false,
        }
    }
}
