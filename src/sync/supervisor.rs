use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::rpc::types::BlockNumberOrTag;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::db::Db;
use crate::indexing::{IndexingPipeline, IndexingStore, ProcessResult};
use crate::rpc::{RateLimitConfig, RequestQueue, RpcClientConfig};
use crate::store::{ChainStatus, MetadataStore, Status, StatusBlock, SyncStore};
use crate::types::checkpoint::Checkpoint;
use crate::types::config::chain::ChainConfig;
use crate::types::config::contract::Source;
use crate::types::config::indexer::{DatabaseConfig, IndexerConfig};
use crate::types::event::BlockRow;
use crate::types::interval::Interval;

use super::events::EventCursor;
use super::historical::{HistoricalSync, SyncOutcome};
use super::realtime::{RealtimeEvent, RealtimeSync};
use super::SyncError;

/// Events per batch when draining the historical cursor.
const HISTORICAL_EVENTS_LIMIT: usize = 10_000;

/// Capacity of the serialized realtime queue.
const REALTIME_QUEUE_CAPACITY: usize = 1_024;

struct NetworkRuntime {
    chain: ChainConfig,
    sources: Vec<Source>,
    queue: Arc<RequestQueue>,
    historical: Arc<HistoricalSync>,
    /// Finalized head at the end of historical catch-up; anchors realtime.
    finalized: Mutex<Option<BlockRow>>,
}

/// Composes the store, RPC queues, historical and realtime syncs, and the
/// downstream indexing pipeline into one lifecycle.
pub struct Supervisor {
    config: IndexerConfig,
    pipeline: Arc<dyn IndexingPipeline>,
    indexing_store: Arc<dyn IndexingStore>,
    is_killed: Arc<AtomicBool>,
    queues: Mutex<Vec<Arc<RequestQueue>>>,
    on_reloadable_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Supervisor {
    pub fn new(
        config: IndexerConfig,
        pipeline: Arc<dyn IndexingPipeline>,
        indexing_store: Arc<dyn IndexingStore>,
    ) -> Self {
        Self {
            config,
            pipeline,
            indexing_store,
            is_killed: Arc::new(AtomicBool::new(false)),
            queues: Mutex::new(Vec::new()),
            on_reloadable_error: None,
        }
    }

    /// Called when the pipeline reports a handler error; the process may
    /// rebuild from the last finalized checkpoint. Without a callback the
    /// error is fatal.
    pub fn with_reloadable_error_handler(
        mut self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_reloadable_error = Some(Box::new(handler));
        self
    }

    /// Stop everything: the flag stops long-running loops between I/O
    /// steps, queue closure fails further RPC dispatch, and the pipeline is
    /// told to wind down. In-flight database transactions complete.
    pub async fn kill(&self) {
        self.is_killed.store(true, Ordering::Relaxed);
        self.pipeline.kill().await;
        for queue in self.queues.lock().await.iter() {
            queue.kill();
        }
        tracing::info!("Supervisor kill requested");
    }

    /// Run the full lifecycle: historical catch-up, store mode swap, then
    /// realtime until killed or a fatal error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let db = match &self.config.database {
            DatabaseConfig::Sqlite { filename } => Db::open_sqlite(filename)?,
            DatabaseConfig::Postgres { connection_string } => {
                Db::connect_postgres(connection_string).await?
            }
        };
        let store = SyncStore::new(db.clone()).await?;
        let metadata = MetadataStore::new(db);

        let initial_checkpoint = resume_checkpoint(&metadata).await?;
        tracing::info!("Starting from checkpoint {}", initial_checkpoint);

        // The realtime queue exists before any sync: syncs only ever hold
        // the sender half, the single worker drains the receiver.
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(REALTIME_QUEUE_CAPACITY);

        let mut networks = Vec::new();
        for chain in &self.config.networks {
            let sources = self.config.sources_for_network(chain)?;
            if sources.is_empty() {
                tracing::warn!("Network {} has no sources; skipping", chain.name);
                continue;
            }

            let url = std::env::var(&chain.rpc_url_env_var).map_err(|_| {
                anyhow::anyhow!(
                    "Environment variable {} not set for network {}",
                    chain.rpc_url_env_var,
                    chain.name
                )
            })?;
            let url = Url::parse(&url)
                .map_err(|e| anyhow::anyhow!("Invalid RPC URL for {}: {e}", chain.name))?;

            let mut rpc_config = RpcClientConfig::new(url)
                .with_max_concurrency(chain.max_rpc_request_concurrency);
            if let Some(rps) = chain.requests_per_second {
                if let Some(rps) = std::num::NonZeroU32::new(rps) {
                    rpc_config = rpc_config.with_rate_limit(RateLimitConfig {
                        requests_per_second: rps,
                        ..RateLimitConfig::default()
                    });
                }
            }

            let queue = Arc::new(RequestQueue::new(
                rpc_config,
                chain.chain_id,
                Some(store.clone()),
            )?);
            self.queues.lock().await.push(queue.clone());

            let historical = Arc::new(HistoricalSync::new(
                chain.clone(),
                sources.clone(),
                queue.clone(),
                store.clone(),
                self.is_killed.clone(),
            ));

            networks.push(Arc::new(NetworkRuntime {
                chain: chain.clone(),
                sources,
                queue,
                historical,
                finalized: Mutex::new(None),
            }));
        }

        let setup = self
            .pipeline
            .process_setup_events(
                &networks.iter().flat_map(|n| n.sources.clone()).collect::<Vec<_>>(),
                &self.config.networks,
            )
            .await;
        match setup {
            ProcessResult::Success => {}
            ProcessResult::Killed => return Ok(()),
            ProcessResult::Error(e) => anyhow::bail!("Setup handlers failed: {e}"),
        }

        // Historical catch-up, all networks in parallel.
        let catchups: Vec<_> = networks
            .iter()
            .map(|network| {
                let network = network.clone();
                tokio::spawn(async move { historical_catchup(network).await })
            })
            .collect();
        for handle in catchups {
            match handle.await? {
                Ok(SyncOutcome::Complete) => {}
                Ok(SyncOutcome::Killed) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        // Drain every finalized event in checkpoint order.
        let all_filters: Vec<_> = networks
            .iter()
            .flat_map(|n| n.sources.iter().map(|s| s.filter.clone()))
            .collect();
        let mut upper = initial_checkpoint;
        for network in &networks {
            if let Some(finalized) = network.finalized.lock().await.as_ref() {
                let end = Checkpoint::block_end(
                    finalized.timestamp,
                    network.chain.chain_id,
                    finalized.number,
                );
                upper = upper.max(end);
            }
        }

        let mut status = historical_status(&networks).await;
        metadata.set_status(&status).await?;

        let mut cursor = EventCursor::new(
            store.clone(),
            all_filters,
            initial_checkpoint,
            upper,
            HISTORICAL_EVENTS_LIMIT,
        );
        while let Some(batch) = cursor.next_batch().await? {
            if self.is_killed.load(Ordering::Relaxed) {
                return Ok(());
            }
            if batch.events.is_empty() {
                continue;
            }

            let last_checkpoint = batch.events.last().map(|e| e.checkpoint);
            match self.pipeline.process_events(&batch.events).await {
                ProcessResult::Success => {}
                ProcessResult::Killed => return Ok(()),
                ProcessResult::Error(e) => return self.handle_reloadable(&e),
            }

            if let Some(checkpoint) = last_checkpoint {
                self.pipeline.update_total_seconds(checkpoint).await;
                update_status_entry(&mut status, checkpoint, false);
                metadata.set_status(&status).await?;
            }
        }

        tracing::info!("Historical catch-up complete");

        // One large write for the whole backfill, then per-block
        // transactions from here on.
        self.indexing_store.flush(true).await?;
        self.indexing_store.create_indexes().await?;
        self.indexing_store.set_realtime().await?;

        for entry in status.0.values_mut() {
            entry.ready = true;
        }
        metadata.set_status(&status).await?;

        // Serialized application of realtime events: block apply, reorg
        // rollback, and finalize advance are mutually exclusive by
        // construction.
        let worker = {
            let pipeline = self.pipeline.clone();
            let indexing_store = self.indexing_store.clone();
            let metadata = MetadataStore::new(store.db().clone());
            let is_killed = self.is_killed.clone();
            tokio::spawn(realtime_worker(
                event_rx,
                pipeline,
                indexing_store,
                metadata,
                status,
                is_killed,
            ))
        };

        let mut realtime_handles = Vec::new();
        for network in &networks {
            let Some(finalized) = network.finalized.lock().await.clone() else {
                tracing::warn!(
                    "No finalized anchor for {}; skipping realtime",
                    network.chain.name
                );
                continue;
            };
            let realtime = Arc::new(RealtimeSync::new(
                network.chain.clone(),
                network.sources.clone(),
                network.queue.clone(),
                store.clone(),
                event_tx.clone(),
                self.is_killed.clone(),
            ));
            realtime_handles.push(realtime.spawn(finalized));
        }
        // The worker sees a closed channel once every sync has stopped.
        drop(event_tx);

        for handle in realtime_handles {
            if let Err(e) = handle.await? {
                self.kill().await;
                let _ = worker.await;
                return Err(e.into());
            }
        }

        match worker.await? {
            WorkerExit::Drained => Ok(()),
            WorkerExit::Reloadable(e) => self.handle_reloadable(&e),
        }
    }

    fn handle_reloadable(&self, error: &str) -> anyhow::Result<()> {
        match &self.on_reloadable_error {
            Some(handler) => {
                tracing::error!("Handler error (reloadable): {}", error);
                handler(error);
                Ok(())
            }
            None => anyhow::bail!("Handler error: {error}"),
        }
    }
}

async fn historical_catchup(network: Arc<NetworkRuntime>) -> Result<SyncOutcome, SyncError> {
    let head = network.queue.get_block_number().await?;
    let finalized_number = head.saturating_sub(network.chain.finality_depth);

    tracing::info!(
        "Historical sync on {}: head {}, finalized {}",
        network.chain.name,
        head,
        finalized_number
    );

    let outcome = network
        .historical
        .sync(Interval::new(0, finalized_number))
        .await?;

    let finalized = match network.historical.latest_block() {
        Some(block) if block.number <= finalized_number => Some(block),
        _ => {
            let block = network
                .queue
                .get_block_by_number(BlockNumberOrTag::Number(finalized_number), false)
                .await?
                .ok_or(SyncError::BlockNotFound(finalized_number))?;
            Some(BlockRow::from_rpc(network.chain.chain_id, &block))
        }
    };
    *network.finalized.lock().await = finalized;

    Ok(outcome)
}

async fn historical_status(networks: &[Arc<NetworkRuntime>]) -> Status {
    let mut status = Status::default();
    for network in networks {
        if let Some(finalized) = network.finalized.lock().await.as_ref() {
            status.0.insert(
                network.chain.chain_id,
                ChainStatus {
                    block: StatusBlock {
                        number: finalized.number,
                        timestamp: finalized.timestamp,
                    },
                    ready: false,
                },
            );
        }
    }
    status
}

fn update_status_entry(status: &mut Status, checkpoint: Checkpoint, ready: bool) {
    let entry = status.0.entry(checkpoint.chain_id).or_insert_with(|| ChainStatus {
        block: StatusBlock {
            number: 0,
            timestamp: 0,
        },
        ready,
    });
    entry.block.number = checkpoint.block_number;
    entry.block.timestamp = checkpoint.block_timestamp;
}

/// Earliest resume position across chains, from persisted status.
async fn resume_checkpoint(metadata: &MetadataStore) -> anyhow::Result<Checkpoint> {
    let Some(status) = metadata.get_status().await? else {
        return Ok(Checkpoint::ZERO);
    };

    let mut earliest: Option<Checkpoint> = None;
    for (chain_id, chain_status) in &status.0 {
        let checkpoint = Checkpoint::block_end(
            chain_status.block.timestamp,
            *chain_id,
            chain_status.block.number,
        );
        earliest = Some(match earliest {
            Some(current) => current.min(checkpoint),
            None => checkpoint,
        });
    }
    Ok(earliest.unwrap_or(Checkpoint::ZERO))
}

enum WorkerExit {
    Drained,
    Reloadable(String),
}

/// The concurrency-1 consumer of realtime events. Status is snapshotted
/// once at startup and maintained locally, so a block's status write never
/// races a concurrent read-modify-write.
async fn realtime_worker(
    mut event_rx: mpsc::Receiver<RealtimeEvent>,
    pipeline: Arc<dyn IndexingPipeline>,
    indexing_store: Arc<dyn IndexingStore>,
    metadata: MetadataStore,
    mut status: Status,
    is_killed: Arc<AtomicBool>,
) -> WorkerExit {
    while let Some(event) = event_rx.recv().await {
        if is_killed.load(Ordering::Relaxed) {
            break;
        }

        match event {
            RealtimeEvent::Block {
                chain_id,
                events,
                checkpoint,
            } => {
                match pipeline.process_events(&events).await {
                    ProcessResult::Success => {}
                    ProcessResult::Killed => break,
                    ProcessResult::Error(e) => return WorkerExit::Reloadable(e),
                }
                // Status reflects only fully-applied blocks.
                update_status_entry(&mut status, checkpoint, true);
                if let Err(e) = metadata.set_status(&status).await {
                    tracing::error!("Failed to persist status: {}", e);
                }
                pipeline.update_total_seconds(checkpoint).await;
                tracing::debug!(
                    "Applied realtime block {} on chain {}",
                    checkpoint.block_number,
                    chain_id
                );
            }
            RealtimeEvent::Reorg { chain_id, checkpoint } => {
                tracing::warn!(
                    "Reverting chain {} to block {}",
                    chain_id,
                    checkpoint.block_number
                );
                // The database revert lands before any event above the
                // reorg point can be applied; the queue is serialized.
                if let Err(e) = indexing_store.revert(checkpoint).await {
                    tracing::error!("Indexing store revert failed: {}", e);
                    return WorkerExit::Reloadable(e.to_string());
                }
                update_status_entry(&mut status, checkpoint, true);
                if let Err(e) = metadata.set_status(&status).await {
                    tracing::error!("Failed to persist status: {}", e);
                }
            }
            RealtimeEvent::Finalize { chain_id, checkpoint } => {
                tracing::debug!(
                    "Chain {} finalized through block {}",
                    chain_id,
                    checkpoint.block_number
                );
            }
        }
    }
    WorkerExit::Drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;
    use crate::types::event::{BlockRow, EventPayload, RawEvent};
    use alloy::primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        calls: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl IndexingPipeline for Recorder {
        async fn process_setup_events(
            &self,
            _sources: &[Source],
            _networks: &[ChainConfig],
        ) -> ProcessResult {
            ProcessResult::Success
        }

        async fn process_events(&self, events: &[RawEvent]) -> ProcessResult {
            let label = events
                .last()
                .map(|e| e.checkpoint.block_number.to_string())
                .unwrap_or_else(|| "empty".into());
            self.calls.lock().unwrap().push(format!("process:{label}"));
            ProcessResult::Success
        }

        async fn update_total_seconds(&self, _checkpoint: Checkpoint) {}

        async fn kill(&self) {}
    }

    #[async_trait]
    impl IndexingStore for Recorder {
        async fn flush(&self, _is_full_flush: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn create_indexes(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_realtime(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn revert(&self, checkpoint: Checkpoint) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("revert:{}", checkpoint.block_number));
            Ok(())
        }
    }

    fn block_event(number: u64) -> (Vec<RawEvent>, Checkpoint) {
        let block = BlockRow {
            hash: B256::from(U256::from(number)),
            parent_hash: B256::from(U256::from(number - 1)),
            number,
            timestamp: number * 10,
            nonce: 0,
            miner: Address::ZERO,
            gas_limit: 0,
            gas_used: 0,
            base_fee_per_gas: None,
            chain_id: 1,
        };
        let checkpoint = Checkpoint::block_end(block.timestamp, 1, number);
        let event = RawEvent {
            filter_index: 0,
            chain_id: 1,
            checkpoint: Checkpoint::block(block.timestamp, 1, number),
            payload: EventPayload::Block { block },
        };
        (vec![event], checkpoint)
    }

    #[tokio::test]
    async fn realtime_queue_applies_block_reorg_block_in_order() {
        let db = Db::in_memory().unwrap();
        schema::migrate(&db).await.unwrap();
        let metadata = MetadataStore::new(db);

        let calls = Arc::new(StdMutex::new(Vec::new()));
        let recorder = Arc::new(Recorder {
            calls: calls.clone(),
        });
        let pipeline: Arc<dyn IndexingPipeline> = recorder.clone();
        let indexing_store: Arc<dyn IndexingStore> = recorder;

        let (event_tx, event_rx) = mpsc::channel(16);
        let worker = tokio::spawn(realtime_worker(
            event_rx,
            pipeline,
            indexing_store,
            metadata,
            Status::default(),
            Arc::new(AtomicBool::new(false)),
        ));

        // Realtime reaches 1003, reorgs back to 1002, then re-extends.
        let (events, checkpoint) = block_event(1003);
        event_tx
            .send(RealtimeEvent::Block {
                chain_id: 1,
                events,
                checkpoint,
            })
            .await
            .unwrap();
        event_tx
            .send(RealtimeEvent::Reorg {
                chain_id: 1,
                checkpoint: Checkpoint::block_end(10020, 1, 1002),
            })
            .await
            .unwrap();
        let (events, checkpoint) = block_event(1003);
        event_tx
            .send(RealtimeEvent::Block {
                chain_id: 1,
                events,
                checkpoint,
            })
            .await
            .unwrap();
        drop(event_tx);

        assert!(matches!(worker.await.unwrap(), WorkerExit::Drained));

        // The revert lands before any event above the reorg point.
        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec!["process:1003", "revert:1002", "process:1003"]
        );
    }
}
