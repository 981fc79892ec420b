//! Contracts consumed from the downstream indexing pipeline. The sync
//! engine calls these; it never implements user handlers itself.

use async_trait::async_trait;

use crate::types::checkpoint::Checkpoint;
use crate::types::config::chain::ChainConfig;
use crate::types::config::contract::Source;
use crate::types::event::RawEvent;

/// Terminal status of a pipeline call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Success,
    Error(String),
    Killed,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessResult::Success)
    }
}

/// The handler runtime that consumes decoded events.
#[async_trait]
pub trait IndexingPipeline: Send + Sync {
    /// Run per-source setup handlers before any events are dispatched.
    async fn process_setup_events(
        &self,
        sources: &[Source],
        networks: &[ChainConfig],
    ) -> ProcessResult;

    /// Dispatch a checkpoint-ordered batch of events to handlers.
    async fn process_events(&self, events: &[RawEvent]) -> ProcessResult;

    /// Progress reporting: the wall-clock position the pipeline has reached.
    async fn update_total_seconds(&self, checkpoint: Checkpoint);

    async fn kill(&self);
}

/// The user-table store the pipeline writes into. Two interchangeable
/// modes: historical buffers writes and flushes in bulk; realtime wraps
/// each block's writes in a transaction keyed by checkpoint so a reorg can
/// revert them atomically.
#[async_trait]
pub trait IndexingStore: Send + Sync {
    /// Flush buffered historical writes. `is_full_flush` marks the final
    /// flush at the end of catch-up.
    async fn flush(&self, is_full_flush: bool) -> anyhow::Result<()>;

    /// Create user-table indexes after the bulk load.
    async fn create_indexes(&self) -> anyhow::Result<()>;

    /// Switch to realtime mode: subsequent writes are transactional per
    /// block checkpoint.
    async fn set_realtime(&self) -> anyhow::Result<()>;

    /// Roll back every write above `checkpoint`.
    async fn revert(&self, checkpoint: Checkpoint) -> anyhow::Result<()>;
}
