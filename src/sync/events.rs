use crate::store::{EventsBatch, GetEventsArgs, StoreError, SyncStore};
use crate::types::checkpoint::Checkpoint;
use crate::types::filter::Filter;

/// Batched iterator over the store's checkpoint-ordered event scan.
///
/// Each call to `next_batch` yields events spanning `(cursor, to]` with at
/// most `limit` of them; the cursor then advances to the batch's upper
/// bound. Callers drain it to exhaustion for the historical phase, then
/// switch to realtime.
pub struct EventCursor {
    store: SyncStore,
    filters: Vec<Filter>,
    cursor: Checkpoint,
    to: Checkpoint,
    limit: usize,
}

impl EventCursor {
    pub fn new(
        store: SyncStore,
        filters: Vec<Filter>,
        from: Checkpoint,
        to: Checkpoint,
        limit: usize,
    ) -> Self {
        Self {
            store,
            filters,
            cursor: from,
            to,
            limit,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.cursor
    }

    pub fn is_drained(&self) -> bool {
        self.cursor >= self.to
    }

    /// The next batch, or `None` once the range is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<EventsBatch>, StoreError> {
        if self.is_drained() {
            return Ok(None);
        }

        let batch = self
            .store
            .get_events(GetEventsArgs {
                filters: &self.filters,
                from: self.cursor,
                to: self.to,
                limit: self.limit,
            })
            .await?;

        self.cursor = batch.cursor;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::store::SyncStore;
    use crate::types::checkpoint::EventType;
    use crate::types::event::{BlockRow, LogRow, TransactionRow};
    use crate::types::filter::{AddressSpec, LogFilter, TopicSlot};
    use alloy::primitives::{Address, Bytes, B256, U256};

    async fn seed_store(blocks: u64) -> SyncStore {
        let store = SyncStore::new(Db::in_memory().unwrap()).await.unwrap();
        for number in 1..=blocks {
            let block = BlockRow {
                hash: B256::from(U256::from(1_000 + number)),
                parent_hash: B256::from(U256::from(999 + number)),
                number,
                timestamp: number * 10,
                nonce: 0,
                miner: Address::repeat_byte(1),
                gas_limit: 0,
                gas_used: 0,
                base_fee_per_gas: None,
                chain_id: 1,
            };
            let tx = TransactionRow {
                hash: B256::from(U256::from(2_000 + number)),
                block_hash: block.hash,
                block_number: number,
                transaction_index: 0,
                from: Address::repeat_byte(2),
                to: None,
                value: U256::ZERO,
                input: Bytes::new(),
                nonce: 0,
                gas: 0,
                chain_id: 1,
            };
            let log = LogRow {
                id: LogRow::make_id(1, number, 0),
                chain_id: 1,
                block_hash: block.hash,
                block_number: number,
                transaction_hash: tx.hash,
                transaction_index: 0,
                log_index: 0,
                address: Address::repeat_byte(9),
                topics: [None, None, None, None],
                data: Bytes::new(),
                checkpoint: Checkpoint {
                    block_timestamp: block.timestamp,
                    chain_id: 1,
                    block_number: number,
                    transaction_index: 0,
                    event_type: EventType::Log,
                    event_index: 0,
                },
            };
            store.insert_block(&block).await.unwrap();
            store.insert_transactions(&[tx]).await.unwrap();
            store.insert_logs(&[log]).await.unwrap();
        }
        store
    }

    fn log_filter() -> Filter {
        Filter::Log(
            LogFilter {
                chain_id: 1,
                from_block: 0,
                to_block: None,
                address: AddressSpec::Single(Address::repeat_byte(9)),
                topics: [
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                    TopicSlot::Any,
                ],
                include_receipts: false,
            }
            .normalized(),
        )
    }

    #[tokio::test]
    async fn drains_in_monotonic_batches() {
        let store = seed_store(5).await;
        let mut cursor = EventCursor::new(
            store,
            vec![log_filter()],
            Checkpoint::ZERO,
            Checkpoint::MAX,
            2,
        );

        let mut seen = Vec::new();
        let mut last = Checkpoint::ZERO;
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            for event in &batch.events {
                assert!(event.checkpoint > last, "checkpoints must increase");
                last = event.checkpoint;
            }
            assert!(batch.events.len() <= 2);
            seen.extend(batch.events.into_iter().map(|e| e.checkpoint.block_number));
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(cursor.is_drained());
        assert!(cursor.next_batch().await.unwrap().is_none());
    }
}
