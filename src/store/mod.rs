pub mod error;
pub mod events;
pub mod intervals;
pub mod metadata;
pub mod rows;
pub mod schema;

use std::collections::HashSet;

use alloy::primitives::{Address, B256};

use crate::db::{BigEncoder, Db, DbOperation, DbValue, WhereClause};
use crate::types::checkpoint::{Checkpoint, EventType};
use crate::types::event::{BlockRow, CallTraceRow, LogRow, TransactionReceiptRow, TransactionRow};
use crate::types::filter::{Factory, Filter};
use crate::types::interval::Interval;

pub use error::StoreError;
pub use events::{EventsBatch, GetEventsArgs};
pub use intervals::MAX_FRAGMENT_INTERVALS;
pub use metadata::{ChainStatus, MetadataStore, Status, StatusBlock};

/// Cap on resolved factory child addresses. A factory whose child set
/// exceeds this is synced without a server-side address filter.
pub const ADDRESS_FILTER_LIMIT: usize = 1_000;

/// The persistent, content-addressed raw-data store plus the interval index
/// recording which block ranges are synced per filter fragment.
#[derive(Clone)]
pub struct SyncStore {
    db: Db,
    encoder: BigEncoder,
}

impl SyncStore {
    /// Open the store and run schema migrations.
    pub async fn new(db: Db) -> Result<Self, StoreError> {
        schema::migrate(&db).await?;
        let encoder = db.encoder();
        Ok(Self { db, encoder })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn encoder(&self) -> &BigEncoder {
        &self.encoder
    }

    // ─── interval index ───────────────────────────────────────────────────────

    pub async fn insert_interval(
        &self,
        filter: &Filter,
        interval: Interval,
    ) -> Result<(), StoreError> {
        intervals::insert_interval(&self.db, filter, interval).await
    }

    pub async fn get_intervals(&self, filter: &Filter) -> Result<Vec<Interval>, StoreError> {
        intervals::get_intervals(&self.db, filter).await
    }

    // ─── raw rows ─────────────────────────────────────────────────────────────

    pub async fn insert_block(&self, block: &BlockRow) -> Result<(), StoreError> {
        self.db
            .execute_transaction(vec![rows::block_insert_op(&self.encoder, block)])
            .await?;
        Ok(())
    }

    pub async fn insert_transactions(
        &self,
        transactions: &[TransactionRow],
    ) -> Result<(), StoreError> {
        let ops = transactions
            .iter()
            .map(|tx| rows::transaction_insert_op(&self.encoder, tx))
            .collect();
        self.db.execute_transaction(ops).await?;
        Ok(())
    }

    pub async fn insert_transaction_receipts(
        &self,
        receipts: &[TransactionReceiptRow],
    ) -> Result<(), StoreError> {
        let ops = receipts
            .iter()
            .map(|receipt| rows::receipt_insert_op(&self.encoder, receipt))
            .collect();
        self.db.execute_transaction(ops).await?;
        Ok(())
    }

    pub async fn insert_logs(&self, logs: &[LogRow]) -> Result<(), StoreError> {
        let ops = logs
            .iter()
            .map(|log| rows::log_insert_op(&self.encoder, log))
            .collect();
        self.db.execute_transaction(ops).await?;
        Ok(())
    }

    /// Insert call traces, replacing any prior traces of the same
    /// transactions. Within each transaction the traces are ordered by
    /// `trace_address` and their checkpoints re-derived from that position,
    /// so a partial earlier insert cannot leave a stale order behind.
    pub async fn insert_call_traces(
        &self,
        chain_id: u64,
        traces: &[CallTraceRow],
    ) -> Result<(), StoreError> {
        if traces.is_empty() {
            return Ok(());
        }

        let mut by_transaction: Vec<(B256, Vec<CallTraceRow>)> = Vec::new();
        for trace in traces {
            match by_transaction.iter_mut().find(|(hash, _)| *hash == trace.transaction_hash) {
                Some((_, group)) => group.push(trace.clone()),
                None => by_transaction.push((trace.transaction_hash, vec![trace.clone()])),
            }
        }

        let mut ops = Vec::new();
        for (transaction_hash, mut group) in by_transaction {
            group.sort_by(|a, b| a.trace_address.cmp(&b.trace_address));

            ops.push(DbOperation::Delete {
                table: "call_traces".into(),
                where_clause: WhereClause::And(vec![
                    ("chain_id".into(), DbValue::Int64(chain_id as i64)),
                    (
                        "transaction_hash".into(),
                        DbValue::Bytes(transaction_hash.to_vec()),
                    ),
                ]),
            });

            for (position, mut trace) in group.into_iter().enumerate() {
                trace.checkpoint = Checkpoint {
                    event_type: EventType::CallTrace,
                    event_index: position as u64,
                    ..trace.checkpoint
                };
                ops.push(rows::trace_insert_op(&self.encoder, &trace));
            }
        }

        self.db.execute_transaction(ops).await?;
        Ok(())
    }

    async fn has_row(&self, table: &str, key_column: &str, hash: &B256) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT 1 AS present FROM {table} WHERE {key_column} = {p1}",
            p1 = self.db.kind().placeholder(1),
        );
        let rows = self.db.query(&sql, &[DbValue::Bytes(hash.to_vec())]).await?;
        Ok(!rows.is_empty())
    }

    pub async fn has_block(&self, hash: &B256) -> Result<bool, StoreError> {
        self.has_row("blocks", "hash", hash).await
    }

    pub async fn has_transaction(&self, hash: &B256) -> Result<bool, StoreError> {
        self.has_row("transactions", "hash", hash).await
    }

    pub async fn has_transaction_receipt(&self, hash: &B256) -> Result<bool, StoreError> {
        self.has_row("transaction_receipts", "transaction_hash", hash).await
    }

    // ─── factory child addresses ──────────────────────────────────────────────

    /// Child addresses registered by the factory's source logs, in source-log
    /// insertion order, capped at `limit`.
    pub async fn get_child_addresses(
        &self,
        factory: &Factory,
        limit: usize,
    ) -> Result<Vec<Address>, StoreError> {
        let limit = limit.min(i64::MAX as usize);
        let sql = format!(
            "SELECT topic0, topic1, topic2, topic3, data FROM logs \
             WHERE chain_id = {p1} AND address = {p2} AND topic0 = {p3} \
             ORDER BY block_number, log_index LIMIT {limit}",
            p1 = self.db.kind().placeholder(1),
            p2 = self.db.kind().placeholder(2),
            p3 = self.db.kind().placeholder(3),
        );
        let rows = self
            .db
            .query(
                &sql,
                &[
                    DbValue::Int64(factory.chain_id as i64),
                    DbValue::Bytes(factory.address.to_vec()),
                    DbValue::Bytes(factory.event_selector.to_vec()),
                ],
            )
            .await?;

        let mut addresses = Vec::new();
        let mut seen = HashSet::new();
        for row in &rows {
            let mut topics = Vec::with_capacity(4);
            for column in ["topic0", "topic1", "topic2", "topic3"] {
                match row.opt_bytes(column)? {
                    Some(bytes) if bytes.len() == 32 => topics.push(B256::from_slice(bytes)),
                    _ => break,
                }
            }
            let data = row.bytes("data")?;
            if let Some(child) = factory.child_address(&topics, data) {
                if seen.insert(child) {
                    addresses.push(child);
                }
            }
        }
        Ok(addresses)
    }

    /// The subset of `candidates` registered as child addresses of `factory`.
    pub async fn filter_child_addresses(
        &self,
        factory: &Factory,
        candidates: &[Address],
    ) -> Result<HashSet<Address>, StoreError> {
        let children = self.get_child_addresses(factory, usize::MAX).await?;
        let children: HashSet<Address> = children.into_iter().collect();
        Ok(candidates
            .iter()
            .filter(|candidate| children.contains(*candidate))
            .copied()
            .collect())
    }

    // ─── RPC request memoization ──────────────────────────────────────────────

    pub async fn insert_rpc_request_result(
        &self,
        request: &str,
        chain_id: u64,
        block_number: u64,
        result: &str,
    ) -> Result<(), StoreError> {
        let block = self.encoder.u64(block_number);
        let sql = format!(
            "INSERT INTO rpc_request_results (request, chain_id, block_number, result) \
             VALUES ({p1}, {p2}, {p3}, {p4}) \
             ON CONFLICT (request, chain_id, block_number) DO UPDATE SET result = EXCLUDED.result",
            p1 = self.db.kind().placeholder(1),
            p2 = self.db.kind().placeholder(2),
            p3 = self.db.kind().placeholder_for(3, &block),
            p4 = self.db.kind().placeholder(4),
        );
        self.db
            .execute(
                &sql,
                &[
                    DbValue::Text(request.to_string()),
                    DbValue::Int64(chain_id as i64),
                    block,
                    DbValue::Text(result.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_rpc_request_result(
        &self,
        request: &str,
        chain_id: u64,
        block_number: u64,
    ) -> Result<Option<String>, StoreError> {
        let block = self.encoder.u64(block_number);
        let sql = format!(
            "SELECT result FROM rpc_request_results \
             WHERE request = {p1} AND chain_id = {p2} AND block_number = {p3}",
            p1 = self.db.kind().placeholder(1),
            p2 = self.db.kind().placeholder(2),
            p3 = self.db.kind().placeholder_for(3, &block),
        );
        let rows = self
            .db
            .query(
                &sql,
                &[
                    DbValue::Text(request.to_string()),
                    DbValue::Int64(chain_id as i64),
                    block,
                ],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(row.text("result")?.to_string())),
            None => Ok(None),
        }
    }

    // ─── pruning ──────────────────────────────────────────────────────────────

    /// Delete raw rows strictly above `from_block` on one chain. Interval
    /// coverage is left untouched: the rows will be re-synced into place.
    pub async fn prune_by_block(&self, chain_id: u64, from_block: u64) -> Result<(), StoreError> {
        let from = self.encoder.u64(from_block);
        for table in ["blocks", "transactions", "transaction_receipts", "logs", "call_traces"] {
            let column = match table {
                "blocks" => "number",
                _ => "block_number",
            };
            let sql = format!(
                "DELETE FROM {table} WHERE chain_id = {p1} AND {column} > {p2}",
                p1 = self.db.kind().placeholder(1),
                p2 = self.db.kind().placeholder_for(2, &from),
            );
            self.db
                .execute(&sql, &[DbValue::Int64(chain_id as i64), from.clone()])
                .await?;
        }
        Ok(())
    }

    /// Roll a chain back to before `from_block`: truncate interval coverage
    /// and delete raw rows and memoized RPC results at or above it.
    pub async fn prune_by_chain(&self, chain_id: u64, from_block: u64) -> Result<(), StoreError> {
        intervals::prune_intervals_by_chain(&self.db, chain_id, from_block).await?;

        let from = self.encoder.u64(from_block);
        for table in [
            "blocks",
            "transactions",
            "transaction_receipts",
            "logs",
            "call_traces",
            "rpc_request_results",
        ] {
            let column = match table {
                "blocks" => "number",
                _ => "block_number",
            };
            let sql = format!(
                "DELETE FROM {table} WHERE chain_id = {p1} AND {column} >= {p2}",
                p1 = self.db.kind().placeholder(1),
                p2 = self.db.kind().placeholder_for(2, &from),
            );
            self.db
                .execute(&sql, &[DbValue::Int64(chain_id as i64), from.clone()])
                .await?;
        }
        Ok(())
    }

    // ─── events ───────────────────────────────────────────────────────────────

    /// Events selected by `filters` with `from < checkpoint <= to`, ordered
    /// by `(checkpoint, filter_index)`, at most `limit` of them.
    pub async fn get_events(&self, args: GetEventsArgs<'_>) -> Result<EventsBatch, StoreError> {
        events::get_events(self, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::checkpoint::EventType;
    use crate::types::event::EventPayload;
    use crate::types::filter::{
        AddressSpec, BlockFilter, ChildAddressLocation, LogFilter, TopicSlot,
    };
    use alloy::primitives::{Bytes, U256};

    async fn test_store() -> SyncStore {
        SyncStore::new(Db::in_memory().unwrap()).await.unwrap()
    }

    fn hash(n: u64) -> B256 {
        B256::from(U256::from(n))
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn block(chain_id: u64, number: u64, timestamp: u64) -> BlockRow {
        BlockRow {
            hash: hash(1_000_000 + number),
            parent_hash: hash(1_000_000 + number.saturating_sub(1)),
            number,
            timestamp,
            nonce: 0,
            miner: addr(0x11),
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            base_fee_per_gas: Some(7),
            chain_id,
        }
    }

    fn transaction(chain_id: u64, block: &BlockRow, index: u64) -> TransactionRow {
        TransactionRow {
            hash: hash(2_000_000 + block.number * 100 + index),
            block_hash: block.hash,
            block_number: block.number,
            transaction_index: index,
            from: addr(0x22),
            to: Some(addr(0x33)),
            value: U256::from(1u64),
            input: Bytes::new(),
            nonce: 0,
            gas: 21_000,
            chain_id,
        }
    }

    fn log(
        chain_id: u64,
        block: &BlockRow,
        tx: &TransactionRow,
        log_index: u64,
        address: Address,
        topics: [Option<B256>; 4],
    ) -> LogRow {
        LogRow {
            id: LogRow::make_id(chain_id, block.number, log_index),
            chain_id,
            block_hash: block.hash,
            block_number: block.number,
            transaction_hash: tx.hash,
            transaction_index: tx.transaction_index,
            log_index,
            address,
            topics,
            data: Bytes::new(),
            checkpoint: Checkpoint {
                block_timestamp: block.timestamp,
                chain_id,
                block_number: block.number,
                transaction_index: tx.transaction_index,
                event_type: EventType::Log,
                event_index: log_index,
            },
        }
    }

    #[tokio::test]
    async fn factory_child_addresses_resolve_from_topic1() {
        let store = test_store().await;
        let factory = Factory {
            chain_id: 1,
            address: addr(0xfa),
            event_selector: B256::repeat_byte(0xab),
            child_address_location: ChildAddressLocation::Topic1,
        };

        let b = block(1, 10, 100);
        let tx = transaction(1, &b, 0);
        let child = addr(0xde);
        let mut child_topic = [0u8; 32];
        child_topic[12..].copy_from_slice(child.as_slice());

        store.insert_block(&b).await.unwrap();
        store.insert_transactions(&[tx.clone()]).await.unwrap();
        store
            .insert_logs(&[log(
                1,
                &b,
                &tx,
                0,
                factory.address,
                [
                    Some(factory.event_selector),
                    Some(B256::from(child_topic)),
                    None,
                    None,
                ],
            )])
            .await
            .unwrap();

        assert_eq!(
            store.get_child_addresses(&factory, 10).await.unwrap(),
            vec![child]
        );

        let filtered = store
            .filter_child_addresses(&factory, &[child, addr(0x99)])
            .await
            .unwrap();
        assert_eq!(filtered, HashSet::from([child]));
    }

    #[tokio::test]
    async fn block_event_sorts_before_log_event_in_same_block() {
        let store = test_store().await;
        let b = block(1, 5, 500);
        let tx = transaction(1, &b, 0);
        let address = addr(0x44);

        store.insert_block(&b).await.unwrap();
        store.insert_transactions(&[tx.clone()]).await.unwrap();
        store
            .insert_logs(&[log(1, &b, &tx, 3, address, [None, None, None, None])])
            .await
            .unwrap();

        let filters = vec![
            Filter::Log(
                LogFilter {
                    chain_id: 1,
                    from_block: 0,
                    to_block: None,
                    address: AddressSpec::Single(address),
                    topics: [
                        TopicSlot::Any,
                        TopicSlot::Any,
                        TopicSlot::Any,
                        TopicSlot::Any,
                    ],
                    include_receipts: false,
                }
                .normalized(),
            ),
            Filter::Block(BlockFilter {
                chain_id: 1,
                from_block: 0,
                to_block: None,
                interval: 1,
                offset: 0,
            }),
        ];

        let batch = store
            .get_events(GetEventsArgs {
                filters: &filters,
                from: Checkpoint::ZERO,
                to: Checkpoint::MAX,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(batch.events.len(), 2);
        assert!(matches!(batch.events[0].payload, EventPayload::Block { .. }));
        assert!(matches!(batch.events[1].payload, EventPayload::Log { .. }));
        assert_eq!(batch.events[0].checkpoint.block_number, 5);
        assert_eq!(batch.events[0].checkpoint.block_timestamp, 500);
        assert_eq!(batch.events[1].checkpoint.block_number, 5);
        assert!(batch.events[0].checkpoint < batch.events[1].checkpoint);
        // Not a full batch, so the cursor advances to the upper bound.
        assert_eq!(batch.cursor, Checkpoint::MAX);
    }

    #[tokio::test]
    async fn events_filter_addresses_at_read_time() {
        let store = test_store().await;
        let b = block(1, 7, 700);
        let tx = transaction(1, &b, 0);
        let wanted = addr(0x55);
        let other = addr(0x66);

        store.insert_block(&b).await.unwrap();
        store.insert_transactions(&[tx.clone()]).await.unwrap();
        // Both logs are in the store (as after an over-cap factory sync
        // that omitted the server-side address filter).
        store
            .insert_logs(&[
                log(1, &b, &tx, 0, wanted, [None, None, None, None]),
                log(1, &b, &tx, 1, other, [None, None, None, None]),
            ])
            .await
            .unwrap();

        let filters = vec![Filter::Log(
            LogFilter {
                chain_id: 1,
                from_block: 0,
                to_block: None,
                address: AddressSpec::Single(wanted),
                topics: [
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                ],
                include_receipts: false,
            }
            .normalized(),
        )];

        let batch = store
            .get_events(GetEventsArgs {
                filters: &filters,
                from: Checkpoint::ZERO,
                to: Checkpoint::MAX,
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(batch.events.len(), 1);
        match &batch.events[0].payload {
            EventPayload::Log { log, .. } => assert_eq!(log.address, wanted),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_batch_cursor_is_last_event_checkpoint() {
        let store = test_store().await;
        let address = addr(0x77);

        for number in 1..=3u64 {
            let b = block(1, number, number * 100);
            let tx = transaction(1, &b, 0);
            store.insert_block(&b).await.unwrap();
            store.insert_transactions(&[tx.clone()]).await.unwrap();
            store
                .insert_logs(&[log(1, &b, &tx, 0, address, [None, None, None, None])])
                .await
                .unwrap();
        }

        let filters = vec![Filter::Log(
            LogFilter {
                chain_id: 1,
                from_block: 0,
                to_block: None,
                address: AddressSpec::Single(address),
                topics: [
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                ],
                include_receipts: false,
            }
            .normalized(),
        )];

        let first = store
            .get_events(GetEventsArgs {
                filters: &filters,
                from: Checkpoint::ZERO,
                to: Checkpoint::MAX,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.cursor, first.events[1].checkpoint);

        // Resume from the cursor; the remaining event arrives.
        let second = store
            .get_events(GetEventsArgs {
                filters: &filters,
                from: first.cursor,
                to: Checkpoint::MAX,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].checkpoint.block_number, 3);
        assert_eq!(second.cursor, Checkpoint::MAX);
    }

    #[tokio::test]
    async fn inserts_are_idempotent() {
        let store = test_store().await;
        let b = block(1, 9, 900);
        let tx = transaction(1, &b, 0);
        let l = log(1, &b, &tx, 0, addr(0x88), [None, None, None, None]);

        for _ in 0..2 {
            store.insert_block(&b).await.unwrap();
            store.insert_transactions(&[tx.clone()]).await.unwrap();
            store.insert_logs(&[l.clone()]).await.unwrap();
        }

        let count = |table: &'static str| {
            let store = store.clone();
            async move {
                store
                    .db()
                    .query(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
                    .await
                    .unwrap()[0]
                    .i64("n")
                    .unwrap()
            }
        };
        assert_eq!(count("blocks").await, 1);
        assert_eq!(count("transactions").await, 1);
        assert_eq!(count("logs").await, 1);
    }

    #[tokio::test]
    async fn call_traces_reinsert_in_trace_address_order() {
        let store = test_store().await;
        let b = block(1, 12, 1200);
        let tx = transaction(1, &b, 0);
        store.insert_block(&b).await.unwrap();
        store.insert_transactions(&[tx.clone()]).await.unwrap();

        let trace = |trace_address: Vec<u64>| CallTraceRow {
            id: CallTraceRow::make_id(&tx.hash, &trace_address),
            chain_id: 1,
            block_hash: b.hash,
            block_number: b.number,
            transaction_hash: tx.hash,
            transaction_position: 0,
            trace_address,
            from: addr(0x22),
            to: addr(0x33),
            input: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            output: None,
            value: U256::ZERO,
            gas: 100_000,
            gas_used: 50_000,
            subtraces: 0,
            call_type: "call".into(),
            error: None,
            checkpoint: Checkpoint {
                block_timestamp: b.timestamp,
                chain_id: 1,
                block_number: b.number,
                transaction_index: 0,
                event_type: EventType::CallTrace,
                event_index: 0,
            },
        };

        // Inserted out of order; checkpoints must follow sorted
        // trace_address order.
        store
            .insert_call_traces(1, &[trace(vec![1]), trace(vec![0])])
            .await
            .unwrap();

        let rows = store
            .db()
            .query(
                "SELECT id, checkpoint FROM call_traces ORDER BY checkpoint",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].text("id").unwrap().ends_with(":0"));
        assert!(rows[1].text("id").unwrap().ends_with(":1"));

        // Re-insert replaces rather than duplicates.
        store.insert_call_traces(1, &[trace(vec![0])]).await.unwrap();
        let rows = store
            .db()
            .query("SELECT id FROM call_traces", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn prune_by_block_keeps_intervals() {
        let store = test_store().await;
        let filter = Filter::Block(BlockFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            interval: 1,
            offset: 0,
        });

        for number in 1..=5u64 {
            store.insert_block(&block(1, number, number * 100)).await.unwrap();
        }
        store
            .insert_interval(&filter, crate::types::interval::Interval::new(1, 5))
            .await
            .unwrap();

        store.prune_by_block(1, 3).await.unwrap();

        let rows = store.db().query("SELECT hash FROM blocks", &[]).await.unwrap();
        assert_eq!(rows.len(), 3);
        // Coverage is untouched; the pruned heights will be re-synced.
        assert_eq!(
            store.get_intervals(&filter).await.unwrap(),
            vec![crate::types::interval::Interval::new(1, 5)]
        );
    }

    #[tokio::test]
    async fn prune_by_chain_clips_intervals_and_rows() {
        let store = test_store().await;
        let filter = Filter::Block(BlockFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            interval: 1,
            offset: 0,
        });

        for number in 1..=5u64 {
            store.insert_block(&block(1, number, number * 100)).await.unwrap();
        }
        store
            .insert_interval(&filter, crate::types::interval::Interval::new(1, 5))
            .await
            .unwrap();
        store
            .insert_rpc_request_result("eth_getBlockByNumber:4", 1, 4, "{}")
            .await
            .unwrap();

        store.prune_by_chain(1, 3).await.unwrap();

        let rows = store.db().query("SELECT hash FROM blocks", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            store.get_intervals(&filter).await.unwrap(),
            vec![crate::types::interval::Interval::new(1, 2)]
        );
        assert_eq!(
            store
                .get_rpc_request_result("eth_getBlockByNumber:4", 1, 4)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn rpc_request_results_memoize() {
        let store = test_store().await;
        assert_eq!(
            store.get_rpc_request_result("eth_getLogs:x", 1, 10).await.unwrap(),
            None
        );
        store
            .insert_rpc_request_result("eth_getLogs:x", 1, 10, "[]")
            .await
            .unwrap();
        assert_eq!(
            store.get_rpc_request_result("eth_getLogs:x", 1, 10).await.unwrap(),
            Some("[]".into())
        );
    }
}
