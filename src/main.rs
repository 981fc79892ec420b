use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use chainsync::indexing::{IndexingPipeline, IndexingStore, ProcessResult};
use chainsync::sync::supervisor::Supervisor;
use chainsync::types::checkpoint::Checkpoint;
use chainsync::types::config::chain::ChainConfig;
use chainsync::types::config::contract::Source;
use chainsync::types::config::indexer::IndexerConfig;
use chainsync::types::event::RawEvent;

/// Stand-in pipeline for running the sync engine without a handler
/// runtime: counts and logs delivered events.
struct LoggingPipeline;

#[async_trait]
impl IndexingPipeline for LoggingPipeline {
    async fn process_setup_events(
        &self,
        sources: &[Source],
        networks: &[ChainConfig],
    ) -> ProcessResult {
        tracing::info!(
            "Setup: {} source(s) across {} network(s)",
            sources.len(),
            networks.len()
        );
        ProcessResult::Success
    }

    async fn process_events(&self, events: &[RawEvent]) -> ProcessResult {
        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            tracing::info!(
                "{} event(s): blocks {}..={}",
                events.len(),
                first.checkpoint.block_number,
                last.checkpoint.block_number
            );
        }
        ProcessResult::Success
    }

    async fn update_total_seconds(&self, _checkpoint: Checkpoint) {}

    async fn kill(&self) {}
}

struct NoopIndexingStore;

#[async_trait]
impl IndexingStore for NoopIndexingStore {
    async fn flush(&self, is_full_flush: bool) -> anyhow::Result<()> {
        tracing::info!("Flush (full: {})", is_full_flush);
        Ok(())
    }

    async fn create_indexes(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_realtime(&self) -> anyhow::Result<()> {
        tracing::info!("Indexing store switched to realtime mode");
        Ok(())
    }

    async fn revert(&self, checkpoint: Checkpoint) -> anyhow::Result<()> {
        tracing::warn!("Revert to checkpoint {}", checkpoint);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.json".to_string());
    let config = IndexerConfig::load(Path::new(&config_path))?;

    tracing::info!(
        "Loaded config with {} network(s) and {} contract(s)",
        config.networks.len(),
        config.contracts.len()
    );

    let supervisor = Supervisor::new(
        config,
        Arc::new(LoggingPipeline),
        Arc::new(NoopIndexingStore),
    );
    supervisor.run().await
}
