use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{BlockNumberOrTag, Filter as RpcFilter};
use futures::future::try_join_all;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OnceCell;

use crate::rpc::{RequestQueue, RpcTraceFrame};
use crate::store::{SyncStore, ADDRESS_FILTER_LIMIT};
use crate::types::checkpoint::{Checkpoint, EventType};
use crate::types::config::chain::ChainConfig;
use crate::types::config::contract::Source;
use crate::types::event::{BlockRow, CallTraceRow, LogRow, TransactionReceiptRow, TransactionRow};
use crate::types::filter::{AddressSpec, BlockFilter, CallTraceFilter, Factory, Filter, LogFilter, TopicSlot};
use crate::types::interval::{interval_chunks, interval_difference, Interval};

use super::SyncError;

/// Max addresses per `eth_getLogs` call; larger sets are split into
/// concurrent batches.
const LOG_ADDRESS_BATCH: usize = 50;

/// Block span per `trace_filter` call.
const TRACE_FILTER_CHUNK: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Complete,
    Killed,
}

/// A block fetched with full transactions, shared across concurrent
/// extraction tasks within one `sync()` call.
struct FetchedBlock {
    block: BlockRow,
    transactions: HashMap<B256, TransactionRow>,
}

/// Coalesces concurrent requests for the same block: the first caller
/// fetches, the rest await the same cell. Scoped to a single `sync()` call.
#[derive(Default)]
struct BlockCache {
    cells: AsyncMutex<HashMap<u64, Arc<OnceCell<Arc<FetchedBlock>>>>>,
}

impl BlockCache {
    async fn get(
        &self,
        queue: &RequestQueue,
        chain_id: u64,
        number: u64,
    ) -> Result<Arc<FetchedBlock>, SyncError> {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(number).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let fetched = cell
            .get_or_try_init(|| async {
                let block = queue
                    .get_block_by_number(BlockNumberOrTag::Number(number), true)
                    .await?
                    .ok_or(SyncError::BlockNotFound(number))?;

                let row = BlockRow::from_rpc(chain_id, &block);
                let mut transactions = HashMap::new();
                if let Some(txns) = block.transactions.as_transactions() {
                    for tx in txns {
                        let tx_row = TransactionRow::from_rpc(chain_id, tx);
                        transactions.insert(tx_row.hash, tx_row);
                    }
                }
                Ok::<_, SyncError>(Arc::new(FetchedBlock {
                    block: row,
                    transactions,
                }))
            })
            .await?;

        Ok(fetched.clone())
    }
}

/// Extracts raw data for the configured sources across block intervals,
/// skipping ranges the interval index already covers.
pub struct HistoricalSync {
    chain: ChainConfig,
    queue: Arc<RequestQueue>,
    store: SyncStore,
    sources: Vec<Source>,
    is_killed: Arc<AtomicBool>,
    completed_blocks: AtomicU64,
    latest_block: Mutex<Option<BlockRow>>,
}

impl HistoricalSync {
    pub fn new(
        chain: ChainConfig,
        sources: Vec<Source>,
        queue: Arc<RequestQueue>,
        store: SyncStore,
        is_killed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            chain,
            queue,
            store,
            sources,
            is_killed,
            completed_blocks: AtomicU64::new(0),
            latest_block: Mutex::new(None),
        }
    }

    /// Highest-numbered block observed during any sync, for metrics and the
    /// realtime handoff.
    pub fn latest_block(&self) -> Option<BlockRow> {
        self.latest_block.lock().unwrap().clone()
    }

    pub fn completed_blocks(&self) -> u64 {
        self.completed_blocks.load(Ordering::Relaxed)
    }

    fn observe_block(&self, block: &BlockRow) {
        let mut latest = self.latest_block.lock().unwrap();
        if latest.as_ref().map(|b| b.number < block.number).unwrap_or(true) {
            *latest = Some(block.clone());
        }
    }

    /// Sync all sources over `interval`. Ranges already recorded in the
    /// interval index are skipped; each source's coverage is committed once
    /// its whole clipped range has been extracted.
    pub async fn sync(&self, interval: Interval) -> Result<SyncOutcome, SyncError> {
        let cache = BlockCache::default();

        for source in &self.sources {
            if self.is_killed.load(Ordering::Relaxed) {
                return Ok(SyncOutcome::Killed);
            }

            let filter = &source.filter;
            let Some(clipped) =
                interval.clip(filter.from_block(), filter.to_block().unwrap_or(u64::MAX))
            else {
                continue;
            };

            let covered = self.store.get_intervals(filter).await?;
            let required = interval_difference(&[clipped], &covered);
            if required.is_empty() {
                tracing::debug!(
                    "Skipping '{}' blocks {}-{} (already synced)",
                    source.name,
                    clipped.start,
                    clipped.end
                );
                continue;
            }

            for sub_interval in required {
                for chunk in interval_chunks(sub_interval, source.max_block_range) {
                    if self.is_killed.load(Ordering::Relaxed) {
                        return Ok(SyncOutcome::Killed);
                    }
                    match filter {
                        Filter::Log(f) => self.sync_log_filter(f, chunk, &cache).await?,
                        Filter::Block(f) => self.sync_block_filter(f, chunk, &cache).await?,
                        Filter::CallTrace(f) => self.sync_trace_filter(f, chunk, &cache).await?,
                    }
                }
            }

            self.store.insert_interval(filter, clipped).await?;
            self.completed_blocks.fetch_add(clipped.len(), Ordering::Relaxed);
            tracing::info!(
                "Synced '{}' blocks {}-{} on {}",
                source.name,
                clipped.start,
                clipped.end,
                self.chain.name
            );
        }

        Ok(SyncOutcome::Complete)
    }

    /// Run the factory's source-log sync, then resolve its child address
    /// set. Returns `None` when the set exceeds `ADDRESS_FILTER_LIMIT`, in
    /// which case `eth_getLogs` runs without a server-side address argument
    /// and the store filters at read time.
    async fn sync_address(
        &self,
        factory: &Factory,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<Option<Vec<Address>>, SyncError> {
        self.sync_log_address_filter(factory, interval, cache).await?;

        let children = self
            .store
            .get_child_addresses(factory, ADDRESS_FILTER_LIMIT + 1)
            .await?;
        if children.len() > ADDRESS_FILTER_LIMIT {
            tracing::debug!(
                "Factory {} resolved {}+ child addresses; filtering at read time",
                factory.address,
                ADDRESS_FILTER_LIMIT
            );
            Ok(None)
        } else {
            Ok(Some(children))
        }
    }

    /// Fetch and insert the factory's defining event logs for `interval`.
    async fn sync_log_address_filter(
        &self,
        factory: &Factory,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<(), SyncError> {
        let rpc_filter = RpcFilter::new()
            .from_block(interval.start)
            .to_block(interval.end)
            .address(factory.address)
            .event_signature(factory.event_selector);

        let logs = self.queue.get_logs(&rpc_filter).await?;
        self.insert_logs_with_blocks(logs, false, cache).await
    }

    async fn sync_log_filter(
        &self,
        filter: &LogFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<(), SyncError> {
        let addresses = match &filter.address {
            AddressSpec::Factory(factory) => self.sync_address(factory, interval, cache).await?,
            spec => spec.static_addresses(),
        };

        // Prefetch the interval's last block; realtime handoff and metrics
        // read it even when no logs land in the range.
        let last_block = cache
            .get(&self.queue, self.chain.chain_id, interval.end)
            .await?;
        self.observe_block(&last_block.block);

        let logs = match addresses {
            Some(addresses) if addresses.len() > LOG_ADDRESS_BATCH => {
                let calls: Vec<_> = addresses
                    .chunks(LOG_ADDRESS_BATCH)
                    .map(|batch| {
                        let rpc_filter = build_log_rpc_filter(filter, Some(batch), interval);
                        let queue = self.queue.clone();
                        async move { queue.get_logs(&rpc_filter).await }
                    })
                    .collect();
                try_join_all(calls).await?.into_iter().flatten().collect()
            }
            Some(addresses) => {
                let rpc_filter = build_log_rpc_filter(filter, Some(&addresses), interval);
                self.queue.get_logs(&rpc_filter).await?
            }
            None => {
                let rpc_filter = build_log_rpc_filter(filter, None, interval);
                self.queue.get_logs(&rpc_filter).await?
            }
        };

        self.insert_logs_with_blocks(logs, filter.include_receipts, cache).await
    }

    /// Fetch each returned log's containing block (through the per-sync
    /// cache) and insert logs, blocks, and transactions together.
    async fn insert_logs_with_blocks(
        &self,
        logs: Vec<alloy::rpc::types::Log>,
        include_receipts: bool,
        cache: &BlockCache,
    ) -> Result<(), SyncError> {
        if logs.is_empty() {
            return Ok(());
        }
        let chain_id = self.chain.chain_id;

        let mut log_rows: Vec<LogRow> = Vec::with_capacity(logs.len());
        let mut blocks: HashMap<B256, BlockRow> = HashMap::new();
        let mut transactions: HashMap<B256, TransactionRow> = HashMap::new();

        for log in &logs {
            let Some(number) = log.block_number else {
                continue;
            };
            let fetched = cache.get(&self.queue, chain_id, number).await?;
            self.observe_block(&fetched.block);

            let Some(row) = LogRow::from_rpc(chain_id, log, fetched.block.timestamp) else {
                continue;
            };
            blocks.insert(fetched.block.hash, fetched.block.clone());
            if let Some(tx) = fetched.transactions.get(&row.transaction_hash) {
                transactions.insert(tx.hash, tx.clone());
            }
            log_rows.push(row);
        }

        for block in blocks.values() {
            self.store.insert_block(block).await?;
        }
        let transactions: Vec<TransactionRow> = transactions.into_values().collect();
        self.store.insert_transactions(&transactions).await?;
        self.store.insert_logs(&log_rows).await?;

        if include_receipts {
            let hashes: HashSet<B256> = log_rows.iter().map(|l| l.transaction_hash).collect();
            let receipts = self.fetch_receipts(hashes).await?;
            self.store.insert_transaction_receipts(&receipts).await?;
        }

        Ok(())
    }

    async fn fetch_receipts(
        &self,
        hashes: HashSet<B256>,
    ) -> Result<Vec<TransactionReceiptRow>, SyncError> {
        let chain_id = self.chain.chain_id;
        let calls: Vec<_> = hashes
            .into_iter()
            .map(|hash| {
                let queue = self.queue.clone();
                async move {
                    let receipt = queue.get_transaction_receipt(hash).await?;
                    Ok::<_, SyncError>(receipt.map(|r| TransactionReceiptRow::from_rpc(chain_id, &r)))
                }
            })
            .collect();

        let mut receipts = Vec::new();
        for receipt in try_join_all(calls).await? {
            match receipt {
                Some(receipt) => receipts.push(receipt),
                None => tracing::warn!("Receipt missing for a mined transaction; skipping"),
            }
        }
        Ok(receipts)
    }

    async fn sync_block_filter(
        &self,
        filter: &BlockFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<(), SyncError> {
        // First selected block at or after the interval start.
        let rem = (interval.start + filter.interval - (filter.offset % filter.interval))
            % filter.interval;
        let first = if rem == 0 {
            interval.start
        } else {
            interval.start + (filter.interval - rem)
        };

        let mut number = first;
        let mut fetches = Vec::new();
        while number <= interval.end {
            fetches.push(number);
            match number.checked_add(filter.interval) {
                Some(next) => number = next,
                None => break,
            }
        }

        let calls: Vec<_> = fetches
            .into_iter()
            .map(|number| cache.get(&self.queue, self.chain.chain_id, number))
            .collect();
        for fetched in try_join_all(calls).await? {
            self.observe_block(&fetched.block);
            self.store.insert_block(&fetched.block).await?;
        }
        Ok(())
    }

    async fn sync_trace_filter(
        &self,
        filter: &CallTraceFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<(), SyncError> {
        let to_addresses = match &filter.to_address {
            AddressSpec::Factory(factory) => self.sync_address(factory, interval, cache).await?,
            spec => spec.static_addresses(),
        };

        let chunks = interval_chunks(interval, TRACE_FILTER_CHUNK);
        let calls: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let queue = self.queue.clone();
                let from_addresses = filter.from_address.clone();
                let to_addresses = to_addresses.clone();
                async move {
                    queue
                        .trace_filter(
                            chunk.start,
                            chunk.end,
                            from_addresses.as_deref(),
                            to_addresses.as_deref(),
                        )
                        .await
                }
            })
            .collect();

        let frames: Vec<RpcTraceFrame> = try_join_all(calls)
            .await?
            .into_iter()
            .flatten()
            .filter(|frame| frame.trace_type == "call")
            .collect();
        if frames.is_empty() {
            return Ok(());
        }

        // Reverted transactions produce traces too; drop them by receipt
        // status before anything is persisted.
        let tx_hashes: HashSet<B256> = frames.iter().filter_map(|f| f.transaction_hash).collect();
        let receipts = self.fetch_receipts(tx_hashes).await?;
        let reverted: HashSet<B256> = receipts
            .iter()
            .filter(|r| !r.status)
            .map(|r| r.transaction_hash)
            .collect();
        self.store.insert_transaction_receipts(&receipts).await?;

        let chain_id = self.chain.chain_id;
        let mut traces: Vec<CallTraceRow> = Vec::new();
        let mut blocks: HashMap<B256, BlockRow> = HashMap::new();
        let mut transactions: HashMap<B256, TransactionRow> = HashMap::new();

        for frame in frames {
            let Some(transaction_hash) = frame.transaction_hash else {
                continue;
            };
            if reverted.contains(&transaction_hash) {
                continue;
            }

            let fetched = cache.get(&self.queue, chain_id, frame.block_number).await?;
            self.observe_block(&fetched.block);
            blocks.insert(fetched.block.hash, fetched.block.clone());
            if let Some(tx) = fetched.transactions.get(&transaction_hash) {
                transactions.insert(tx.hash, tx.clone());
            }

            traces.push(trace_row(chain_id, &fetched.block, frame, transaction_hash));
        }

        for block in blocks.values() {
            self.store.insert_block(block).await?;
        }
        let transactions: Vec<TransactionRow> = transactions.into_values().collect();
        self.store.insert_transactions(&transactions).await?;
        self.store.insert_call_traces(chain_id, &traces).await?;
        Ok(())
    }
}

pub(crate) fn build_log_rpc_filter(
    filter: &LogFilter,
    addresses: Option<&[Address]>,
    interval: Interval,
) -> RpcFilter {
    let mut rpc_filter = RpcFilter::new()
        .from_block(interval.start)
        .to_block(interval.end);
    if let Some(addresses) = addresses {
        rpc_filter = rpc_filter.address(addresses.to_vec());
    }
    for (i, slot) in filter.topics.iter().enumerate() {
        match slot {
            TopicSlot::Any => {}
            TopicSlot::One(value) => rpc_filter.topics[i] = (*value).into(),
            TopicSlot::OneOf(values) => rpc_filter.topics[i] = values.clone().into(),
        }
    }
    rpc_filter
}

pub(crate) fn trace_row(
    chain_id: u64,
    block: &BlockRow,
    frame: RpcTraceFrame,
    transaction_hash: B256,
) -> CallTraceRow {
    let transaction_position = frame.transaction_position.unwrap_or_default();
    CallTraceRow {
        id: CallTraceRow::make_id(&transaction_hash, &frame.trace_address),
        chain_id,
        block_hash: block.hash,
        block_number: block.number,
        transaction_hash,
        transaction_position,
        trace_address: frame.trace_address,
        from: frame.action.from,
        to: frame.action.to.unwrap_or_default(),
        input: frame.action.input,
        output: frame.result.as_ref().map(|r| r.output.clone()),
        value: frame.action.value,
        gas: frame.action.gas.to::<u64>(),
        gas_used: frame
            .result
            .as_ref()
            .map(|r| r.gas_used.to::<u64>())
            .unwrap_or_default(),
        subtraces: frame.subtraces,
        call_type: frame.action.call_type.unwrap_or_else(|| "call".to_string()),
        error: frame.error,
        // The store re-derives the event index from the trace's position in
        // the transaction's sorted trace set.
        checkpoint: Checkpoint {
            block_timestamp: block.timestamp,
            chain_id,
            block_number: block.number,
            transaction_index: transaction_position,
            event_type: EventType::CallTrace,
            event_index: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_filter_enumeration_arithmetic() {
        // (n - offset) % interval == 0 over [start, end].
        let selected = |start: u64, end: u64, interval: u64, offset: u64| -> Vec<u64> {
            let rem = (start + interval - (offset % interval)) % interval;
            let first = if rem == 0 { start } else { start + (interval - rem) };
            (first..=end).step_by(interval as usize).collect()
        };

        assert_eq!(selected(0, 30, 10, 0), vec![0, 10, 20, 30]);
        assert_eq!(selected(1, 30, 10, 0), vec![10, 20, 30]);
        assert_eq!(selected(0, 25, 10, 3), vec![3, 13, 23]);
        assert_eq!(selected(14, 25, 10, 3), vec![23]);
        assert_eq!(selected(23, 23, 10, 3), vec![23]);
    }

    #[test]
    fn trace_chunks_are_ten_blocks() {
        let chunks = interval_chunks(Interval::new(100, 135), TRACE_FILTER_CHUNK);
        assert_eq!(
            chunks,
            vec![
                Interval::new(100, 109),
                Interval::new(110, 119),
                Interval::new(120, 129),
                Interval::new(130, 135),
            ]
        );
    }
}
