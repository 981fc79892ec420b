use alloy::consensus::{Transaction as _, TxReceipt as _};
use alloy::network::TransactionResponse as _;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{Block, Transaction, TransactionReceipt};

use crate::types::checkpoint::{Checkpoint, EventType};

/// Decoded block header row as persisted in the raw store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub miner: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub base_fee_per_gas: Option<u64>,
    pub chain_id: u64,
}

impl BlockRow {
    pub fn from_rpc(chain_id: u64, block: &Block) -> Self {
        Self {
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            number: block.header.number,
            timestamp: block.header.timestamp,
            nonce: u64::from_be_bytes(block.header.nonce.0),
            miner: block.header.beneficiary,
            gas_limit: block.header.gas_limit,
            gas_used: block.header.gas_used,
            base_fee_per_gas: block.header.base_fee_per_gas,
            chain_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: u64,
    pub gas: u64,
    pub chain_id: u64,
}

impl TransactionRow {
    pub fn from_rpc(chain_id: u64, tx: &Transaction) -> Self {
        Self {
            hash: tx.tx_hash(),
            block_hash: tx.block_hash.unwrap_or_default(),
            block_number: tx.block_number.unwrap_or_default(),
            transaction_index: tx.transaction_index.unwrap_or_default(),
            from: tx.from(),
            to: tx.to(),
            value: tx.value(),
            input: tx.input().clone(),
            nonce: tx.nonce(),
            gas: tx.gas_limit(),
            chain_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceiptRow {
    pub transaction_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub status: bool,
    pub chain_id: u64,
}

impl TransactionReceiptRow {
    pub fn from_rpc(chain_id: u64, receipt: &TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_hash: receipt.block_hash.unwrap_or_default(),
            block_number: receipt.block_number.unwrap_or_default(),
            transaction_index: receipt.transaction_index.unwrap_or_default(),
            from: receipt.from,
            to: receipt.to,
            contract_address: receipt.contract_address,
            cumulative_gas_used: receipt.inner.cumulative_gas_used(),
            gas_used: receipt.gas_used,
            status: receipt.inner.status(),
            chain_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    /// Synthesized as `{chain_id}:{block_number}:{log_index}`.
    pub id: String,
    pub chain_id: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    pub address: Address,
    pub topics: [Option<B256>; 4],
    pub data: Bytes,
    pub checkpoint: Checkpoint,
}

impl LogRow {
    pub fn make_id(chain_id: u64, block_number: u64, log_index: u64) -> String {
        format!("{chain_id}:{block_number}:{log_index}")
    }

    /// Convert an RPC log. Returns `None` for pending logs (no block
    /// coordinates yet); those are never indexable.
    pub fn from_rpc(chain_id: u64, log: &alloy::rpc::types::Log, block_timestamp: u64) -> Option<Self> {
        let block_number = log.block_number?;
        let block_hash = log.block_hash?;
        let transaction_hash = log.transaction_hash?;
        let transaction_index = log.transaction_index?;
        let log_index = log.log_index?;

        let mut topics = [None; 4];
        for (i, topic) in log.topics().iter().take(4).enumerate() {
            topics[i] = Some(*topic);
        }

        Some(Self {
            id: Self::make_id(chain_id, block_number, log_index),
            chain_id,
            block_hash,
            block_number,
            transaction_hash,
            transaction_index,
            log_index,
            address: log.address(),
            topics,
            data: log.data().data.clone(),
            checkpoint: Checkpoint {
                block_timestamp,
                chain_id,
                block_number,
                transaction_index,
                event_type: EventType::Log,
                event_index: log_index,
            },
        })
    }

    pub fn topics_vec(&self) -> Vec<B256> {
        self.topics.iter().flatten().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTraceRow {
    /// Synthesized from the transaction hash and the trace's position in the
    /// call tree (`{tx_hash}:{trace_address joined by '.'}`).
    pub id: String,
    pub chain_id: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_position: u64,
    pub trace_address: Vec<u64>,
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub output: Option<Bytes>,
    pub value: U256,
    pub gas: u64,
    pub gas_used: u64,
    pub subtraces: u64,
    pub call_type: String,
    pub error: Option<String>,
    pub checkpoint: Checkpoint,
}

impl CallTraceRow {
    pub fn make_id(transaction_hash: &B256, trace_address: &[u64]) -> String {
        let path: Vec<String> = trace_address.iter().map(|n| n.to_string()).collect();
        format!("{}:{}", hex::encode(transaction_hash), path.join("."))
    }
}

/// The decoded contents of one indexable event, assembled by the event
/// cursor from the raw tables. A sum type rather than a lazily-decoding
/// proxy: every field the downstream handler can touch is materialized.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Block {
        block: BlockRow,
    },
    Log {
        log: LogRow,
        block: BlockRow,
        transaction: TransactionRow,
        receipt: Option<TransactionReceiptRow>,
    },
    Call {
        trace: CallTraceRow,
        block: BlockRow,
        transaction: TransactionRow,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Block { .. } => EventType::Block,
            Self::Log { .. } => EventType::Log,
            Self::Call { .. } => EventType::CallTrace,
        }
    }
}

/// One event delivered to the indexing pipeline: the payload plus its
/// position in the global order and the filter that selected it.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub filter_index: usize,
    pub chain_id: u64,
    pub checkpoint: Checkpoint,
    pub payload: EventPayload,
}
