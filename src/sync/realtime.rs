use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Block, BlockNumberOrTag};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::rpc::RequestQueue;
use crate::store::{SyncStore, ADDRESS_FILTER_LIMIT};
use crate::types::checkpoint::Checkpoint;
use crate::types::config::chain::ChainConfig;
use crate::types::config::contract::Source;
use crate::types::event::{BlockRow, RawEvent, TransactionReceiptRow, TransactionRow};
use crate::types::filter::{AddressSpec, CallTraceFilter, Filter, LogFilter};
use crate::types::interval::Interval;

use super::historical::{build_log_rpc_filter, trace_row};
use super::SyncError;

/// Events emitted per network by the realtime sync, applied strictly in
/// arrival order by the supervisor's serialized queue.
#[derive(Debug)]
pub enum RealtimeEvent {
    /// A new block's decoded events, ready for handler dispatch.
    Block {
        chain_id: u64,
        events: Vec<RawEvent>,
        checkpoint: Checkpoint,
    },
    /// The chain reorganized; everything above `checkpoint` was rolled back.
    Reorg { chain_id: u64, checkpoint: Checkpoint },
    /// A block crossed the finality depth.
    Finalize { chain_id: u64, checkpoint: Checkpoint },
}

/// Events read back per applied block; bounds one `get_events` page.
const REALTIME_EVENTS_LIMIT: usize = 10_000;

struct FullBlock {
    row: BlockRow,
    transactions: HashMap<B256, TransactionRow>,
}

impl FullBlock {
    fn from_rpc(chain_id: u64, block: &Block) -> Self {
        let row = BlockRow::from_rpc(chain_id, block);
        let mut transactions = HashMap::new();
        if let Some(txns) = block.transactions.as_transactions() {
            for tx in txns {
                let tx_row = TransactionRow::from_rpc(chain_id, tx);
                transactions.insert(tx_row.hash, tx_row);
            }
        }
        Self { row, transactions }
    }
}

struct ChainState {
    /// Unfinalized blocks, ascending, contiguous above `finalized`.
    unfinalized: Vec<BlockRow>,
    finalized: BlockRow,
    /// Upper bound of the last emitted block batch.
    last_emitted: Checkpoint,
}

impl ChainState {
    fn tip(&self) -> &BlockRow {
        self.unfinalized.last().unwrap_or(&self.finalized)
    }
}

/// Polls one chain's head, maintains the unfinalized tail, and emits
/// `block | reorg | finalize` events through the supervisor's queue.
pub struct RealtimeSync {
    chain: ChainConfig,
    sources: Vec<Source>,
    queue: Arc<RequestQueue>,
    store: SyncStore,
    event_tx: mpsc::Sender<RealtimeEvent>,
    is_killed: Arc<AtomicBool>,
}

impl RealtimeSync {
    pub fn new(
        chain: ChainConfig,
        sources: Vec<Source>,
        queue: Arc<RequestQueue>,
        store: SyncStore,
        event_tx: mpsc::Sender<RealtimeEvent>,
        is_killed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            chain,
            sources,
            queue,
            store,
            event_tx,
            is_killed,
        }
    }

    /// Start the polling loop. `finalized` anchors the unfinalized tail;
    /// realtime picks up at the block after it.
    pub fn spawn(self: Arc<Self>, finalized: BlockRow) -> JoinHandle<Result<(), SyncError>> {
        tokio::spawn(async move { self.run(finalized).await })
    }

    async fn run(self: Arc<Self>, finalized: BlockRow) -> Result<(), SyncError> {
        let mut state = ChainState {
            last_emitted: Checkpoint::block_end(
                finalized.timestamp,
                self.chain.chain_id,
                finalized.number,
            ),
            unfinalized: Vec::new(),
            finalized,
        };

        let mut ticker = tokio::time::interval(Duration::from_millis(self.chain.polling_interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "Realtime sync started for {} from block {}",
            self.chain.name,
            state.finalized.number
        );

        loop {
            if self.is_killed.load(Ordering::Relaxed) {
                tracing::info!("Realtime sync stopped for {}", self.chain.name);
                return Ok(());
            }
            ticker.tick().await;

            match self.poll(&mut state).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(SyncError::Killed) => return Ok(()),
                Err(e) => {
                    // Transient failures retry on the next tick.
                    tracing::warn!("Realtime poll failed on {}: {}", self.chain.name, e);
                }
            }
        }
    }

    async fn poll(&self, state: &mut ChainState) -> Result<(), SyncError> {
        let latest = self
            .queue
            .get_block_by_number(BlockNumberOrTag::Latest, true)
            .await?
            .ok_or(SyncError::BlockNotFound(u64::MAX))?;
        let latest = FullBlock::from_rpc(self.chain.chain_id, &latest);

        let tip = state.tip();
        if latest.row.hash == tip.hash {
            return Ok(());
        }

        // A lagging endpoint can serve a head we already applied; that is
        // not a reorg.
        if latest.row.number <= tip.number
            && (state.finalized.hash == latest.row.hash
                || state.unfinalized.iter().any(|b| b.hash == latest.row.hash))
        {
            return Ok(());
        }

        if latest.row.parent_hash == tip.hash {
            self.apply_blocks(state, vec![latest]).await?;
            return Ok(());
        }

        if latest.row.number > tip.number + 1 {
            // Poll gap: fill the missing heights, then verify linkage.
            let mut blocks = Vec::with_capacity((latest.row.number - tip.number) as usize);
            for number in (tip.number + 1)..latest.row.number {
                let block = self
                    .queue
                    .get_block_by_number(BlockNumberOrTag::Number(number), true)
                    .await?
                    .ok_or(SyncError::BlockNotFound(number))?;
                blocks.push(FullBlock::from_rpc(self.chain.chain_id, &block));
            }
            blocks.push(latest);

            let linked = blocks.first().map(|b| b.row.parent_hash) == Some(state.tip().hash)
                && blocks.windows(2).all(|w| w[1].row.parent_hash == w[0].row.hash);
            if linked {
                self.apply_blocks(state, blocks).await?;
                return Ok(());
            }
            // A reorg happened under the gap fill; fall through.
            let latest = blocks.pop().expect("gap fill is non-empty");
            return self.handle_reorg(state, latest).await;
        }

        self.handle_reorg(state, latest).await
    }

    /// Walk back from `latest` until a block in the local chain is found;
    /// the orphaned suffix above it is rolled back, then the new branch is
    /// applied.
    async fn handle_reorg(&self, state: &mut ChainState, latest: FullBlock) -> Result<(), SyncError> {
        let chain_id = self.chain.chain_id;
        let mut new_branch = vec![latest];

        let ancestor = loop {
            let probe = new_branch.last().expect("branch is non-empty");
            let parent_hash = probe.row.parent_hash;

            if parent_hash == state.finalized.hash {
                break state.finalized.clone();
            }
            if let Some(local) = state.unfinalized.iter().find(|b| b.hash == parent_hash) {
                break local.clone();
            }
            if probe.row.number <= state.finalized.number + 1 {
                return Err(SyncError::ReorgBeyondFinality {
                    chain_id,
                    finalized_block: state.finalized.number,
                });
            }

            let parent = self
                .queue
                .get_block_by_hash(parent_hash, true)
                .await?
                .ok_or(SyncError::BlockNotFound(probe.row.number.saturating_sub(1)))?;
            new_branch.push(FullBlock::from_rpc(chain_id, &parent));
        };

        let depth = state.tip().number.saturating_sub(ancestor.number);
        tracing::warn!(
            "Reorg of depth {} on {} (common ancestor {})",
            depth,
            self.chain.name,
            ancestor.number
        );

        // Roll the store back before anything new is applied or emitted.
        state.unfinalized.retain(|b| b.number <= ancestor.number);
        self.store.prune_by_block(chain_id, ancestor.number).await?;

        let checkpoint = Checkpoint::block_end(ancestor.timestamp, chain_id, ancestor.number);
        state.last_emitted = checkpoint;
        self.emit(RealtimeEvent::Reorg {
            chain_id,
            checkpoint,
        })
        .await?;

        new_branch.reverse();
        self.apply_blocks(state, new_branch).await
    }

    /// Extract, persist, and emit each block in ascending order, then
    /// advance finality.
    async fn apply_blocks(
        &self,
        state: &mut ChainState,
        blocks: Vec<FullBlock>,
    ) -> Result<(), SyncError> {
        let chain_id = self.chain.chain_id;

        for block in blocks {
            if self.is_killed.load(Ordering::Relaxed) {
                return Err(SyncError::Killed);
            }

            self.extract_block(&block).await?;

            let checkpoint =
                Checkpoint::block_end(block.row.timestamp, chain_id, block.row.number);
            let events = self.collect_events(state.last_emitted, checkpoint).await?;

            tracing::debug!(
                "Applied block {} on {} ({} events)",
                block.row.number,
                self.chain.name,
                events.len()
            );

            state.unfinalized.push(block.row);
            state.last_emitted = checkpoint;
            self.emit(RealtimeEvent::Block {
                chain_id,
                events,
                checkpoint,
            })
            .await?;
        }

        self.advance_finality(state).await
    }

    async fn collect_events(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> Result<Vec<RawEvent>, SyncError> {
        let filters: Vec<Filter> = self.sources.iter().map(|s| s.filter.clone()).collect();
        let mut events = Vec::new();
        let mut cursor = from;
        loop {
            let batch = self
                .store
                .get_events(crate::store::GetEventsArgs {
                    filters: &filters,
                    from: cursor,
                    to,
                    limit: REALTIME_EVENTS_LIMIT,
                })
                .await?;
            events.extend(batch.events);
            if batch.cursor >= to {
                break;
            }
            cursor = batch.cursor;
        }
        Ok(events)
    }

    /// Per-source extraction over a single new block.
    async fn extract_block(&self, block: &FullBlock) -> Result<(), SyncError> {
        self.store.insert_block(&block.row).await?;

        for source in &self.sources {
            let filter = &source.filter;
            if block.row.number < filter.from_block()
                || filter.to_block().map(|to| block.row.number > to).unwrap_or(false)
            {
                continue;
            }
            match filter {
                Filter::Log(f) => self.extract_logs(f, block).await?,
                Filter::CallTrace(f) => self.extract_traces(f, block).await?,
                // The block row is already inserted; the modulus predicate
                // applies at read time.
                Filter::Block(_) => {}
            }
        }
        Ok(())
    }

    /// Resolve a factory's known children from the store, with the same cap
    /// rule as historical sync.
    async fn resolve_addresses(
        &self,
        spec: &AddressSpec,
    ) -> Result<Option<Vec<Address>>, SyncError> {
        match spec {
            AddressSpec::Factory(factory) => {
                let children = self
                    .store
                    .get_child_addresses(factory, ADDRESS_FILTER_LIMIT + 1)
                    .await?;
                if children.len() > ADDRESS_FILTER_LIMIT {
                    Ok(None)
                } else {
                    Ok(Some(children))
                }
            }
            spec => Ok(spec.static_addresses()),
        }
    }

    async fn extract_logs(&self, filter: &LogFilter, block: &FullBlock) -> Result<(), SyncError> {
        let chain_id = self.chain.chain_id;

        // A factory's defining event can land in the same block as a child
        // event, so the source logs are extracted first.
        if let AddressSpec::Factory(factory) = &filter.address {
            let rpc_filter = alloy::rpc::types::Filter::new()
                .at_block_hash(block.row.hash)
                .address(factory.address)
                .event_signature(factory.event_selector);
            let logs = self.queue.get_logs(&rpc_filter).await?;
            let rows: Vec<_> = logs
                .iter()
                .filter_map(|l| crate::types::event::LogRow::from_rpc(chain_id, l, block.row.timestamp))
                .collect();
            self.store.insert_logs(&rows).await?;
        }

        let addresses = self.resolve_addresses(&filter.address).await?;
        let mut rpc_filter =
            build_log_rpc_filter(filter, addresses.as_deref(), Interval::new(0, 0));
        rpc_filter = rpc_filter.at_block_hash(block.row.hash);

        let logs = self.queue.get_logs(&rpc_filter).await?;
        if logs.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(logs.len());
        let mut transactions = Vec::new();
        for log in &logs {
            let Some(row) = crate::types::event::LogRow::from_rpc(chain_id, log, block.row.timestamp)
            else {
                continue;
            };
            if let Some(tx) = block.transactions.get(&row.transaction_hash) {
                transactions.push(tx.clone());
            }
            rows.push(row);
        }

        self.store.insert_transactions(&transactions).await?;
        self.store.insert_logs(&rows).await?;

        if filter.include_receipts {
            let hashes: HashSet<B256> = rows.iter().map(|r| r.transaction_hash).collect();
            let mut receipts = Vec::new();
            for hash in hashes {
                if let Some(receipt) = self.queue.get_transaction_receipt(hash).await? {
                    receipts.push(TransactionReceiptRow::from_rpc(chain_id, &receipt));
                }
            }
            self.store.insert_transaction_receipts(&receipts).await?;
        }
        Ok(())
    }

    async fn extract_traces(
        &self,
        filter: &CallTraceFilter,
        block: &FullBlock,
    ) -> Result<(), SyncError> {
        let chain_id = self.chain.chain_id;
        let to_addresses = self.resolve_addresses(&filter.to_address).await?;

        let frames = self
            .queue
            .trace_filter(
                block.row.number,
                block.row.number,
                filter.from_address.as_deref(),
                to_addresses.as_deref(),
            )
            .await?;
        let frames: Vec<_> = frames
            .into_iter()
            .filter(|f| f.trace_type == "call")
            .collect();
        if frames.is_empty() {
            return Ok(());
        }

        let tx_hashes: HashSet<B256> = frames.iter().filter_map(|f| f.transaction_hash).collect();
        let mut receipts = Vec::new();
        for hash in tx_hashes {
            if let Some(receipt) = self.queue.get_transaction_receipt(hash).await? {
                receipts.push(TransactionReceiptRow::from_rpc(chain_id, &receipt));
            }
        }
        let reverted: HashSet<B256> = receipts
            .iter()
            .filter(|r| !r.status)
            .map(|r| r.transaction_hash)
            .collect();
        self.store.insert_transaction_receipts(&receipts).await?;

        let mut traces = Vec::new();
        let mut transactions = Vec::new();
        for frame in frames {
            let Some(transaction_hash) = frame.transaction_hash else {
                continue;
            };
            if reverted.contains(&transaction_hash) {
                continue;
            }
            if let Some(tx) = block.transactions.get(&transaction_hash) {
                transactions.push(tx.clone());
            }
            traces.push(trace_row(chain_id, &block.row, frame, transaction_hash));
        }

        self.store.insert_transactions(&transactions).await?;
        self.store.insert_call_traces(chain_id, &traces).await?;
        Ok(())
    }

    /// Move the finality boundary forward: record interval coverage for the
    /// newly finalized span, drop it from the unfinalized tail, and emit.
    async fn advance_finality(&self, state: &mut ChainState) -> Result<(), SyncError> {
        let chain_id = self.chain.chain_id;
        let tip_number = state.tip().number;
        let new_finalized_number = tip_number.saturating_sub(self.chain.finality_depth);
        if new_finalized_number <= state.finalized.number {
            return Ok(());
        }

        let Some(new_finalized) = state
            .unfinalized
            .iter()
            .find(|b| b.number == new_finalized_number)
            .cloned()
        else {
            return Ok(());
        };

        let span = Interval::new(state.finalized.number + 1, new_finalized.number);
        for source in &self.sources {
            let filter = &source.filter;
            if let Some(clipped) =
                span.clip(filter.from_block(), filter.to_block().unwrap_or(u64::MAX))
            {
                self.store.insert_interval(filter, clipped).await?;
            }
        }

        state.unfinalized.retain(|b| b.number > new_finalized.number);
        let checkpoint =
            Checkpoint::block_end(new_finalized.timestamp, chain_id, new_finalized.number);
        state.finalized = new_finalized;

        self.emit(RealtimeEvent::Finalize {
            chain_id,
            checkpoint,
        })
        .await
    }

    async fn emit(&self, event: RealtimeEvent) -> Result<(), SyncError> {
        // A dropped receiver means the supervisor is shutting down.
        self.event_tx.send(event).await.map_err(|_| SyncError::Killed)
    }
}
