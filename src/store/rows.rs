use alloy::primitives::{Address, Bytes, B256};

use crate::db::{BigEncoder, DbKind, DbOperation, DbRow, DbValue};
use crate::types::checkpoint::Checkpoint;
use crate::types::event::{BlockRow, CallTraceRow, LogRow, TransactionReceiptRow, TransactionRow};

use super::error::StoreError;

fn b256(row: &DbRow, column: &str) -> Result<B256, StoreError> {
    let bytes = row.bytes(column)?;
    if bytes.len() != 32 {
        return Err(StoreError::Decode(format!(
            "column '{column}' is not 32 bytes"
        )));
    }
    Ok(B256::from_slice(bytes))
}

fn opt_b256(row: &DbRow, column: &str) -> Result<Option<B256>, StoreError> {
    match row.opt_bytes(column)? {
        Some(bytes) if bytes.len() == 32 => Ok(Some(B256::from_slice(bytes))),
        Some(_) => Err(StoreError::Decode(format!(
            "column '{column}' is not 32 bytes"
        ))),
        None => Ok(None),
    }
}

fn address(row: &DbRow, column: &str) -> Result<Address, StoreError> {
    let bytes = row.bytes(column)?;
    if bytes.len() != 20 {
        return Err(StoreError::Decode(format!(
            "column '{column}' is not 20 bytes"
        )));
    }
    Ok(Address::from_slice(bytes))
}

fn opt_address(row: &DbRow, column: &str) -> Result<Option<Address>, StoreError> {
    match row.opt_bytes(column)? {
        Some(bytes) if bytes.len() == 20 => Ok(Some(Address::from_slice(bytes))),
        Some(_) => Err(StoreError::Decode(format!(
            "column '{column}' is not 20 bytes"
        ))),
        None => Ok(None),
    }
}

fn checkpoint(row: &DbRow, column: &str) -> Result<Checkpoint, StoreError> {
    let text = row.text(column)?;
    Checkpoint::decode(text)
        .ok_or_else(|| StoreError::Decode(format!("invalid checkpoint '{text}'")))
}

// ─── blocks ───────────────────────────────────────────────────────────────────

pub fn block_select(kind: DbKind) -> String {
    format!(
        "hash, parent_hash, {number}, {timestamp}, {nonce}, miner, gas_limit, gas_used, \
         {base_fee}, chain_id, checkpoint",
        number = kind.big_column("number"),
        timestamp = kind.big_column("timestamp"),
        nonce = kind.big_column("nonce"),
        base_fee = kind.big_column("base_fee_per_gas"),
    )
}

pub fn block_insert_op(encoder: &BigEncoder, block: &BlockRow) -> DbOperation {
    let checkpoint = Checkpoint::block(block.timestamp, block.chain_id, block.number);
    DbOperation::Upsert {
        table: "blocks".into(),
        columns: [
            "hash",
            "parent_hash",
            "number",
            "timestamp",
            "nonce",
            "miner",
            "gas_limit",
            "gas_used",
            "base_fee_per_gas",
            "chain_id",
            "checkpoint",
        ]
        .map(String::from)
        .to_vec(),
        values: vec![
            DbValue::Bytes(block.hash.to_vec()),
            DbValue::Bytes(block.parent_hash.to_vec()),
            encoder.u64(block.number),
            encoder.u64(block.timestamp),
            encoder.u64(block.nonce),
            DbValue::Bytes(block.miner.to_vec()),
            DbValue::Int64(block.gas_limit as i64),
            DbValue::Int64(block.gas_used as i64),
            encoder.opt_u64(block.base_fee_per_gas),
            DbValue::Int64(block.chain_id as i64),
            DbValue::Text(checkpoint.encode()),
        ],
        conflict_columns: vec!["hash".into()],
        update_columns: vec![],
    }
}

pub fn decode_block(encoder: &BigEncoder, row: &DbRow) -> Result<BlockRow, StoreError> {
    Ok(BlockRow {
        hash: b256(row, "hash")?,
        parent_hash: b256(row, "parent_hash")?,
        number: encoder.row_u64(row, "number")?,
        timestamp: encoder.row_u64(row, "timestamp")?,
        nonce: encoder.row_u64(row, "nonce")?,
        miner: address(row, "miner")?,
        gas_limit: row.i64("gas_limit")? as u64,
        gas_used: row.i64("gas_used")? as u64,
        base_fee_per_gas: encoder.row_opt_u64(row, "base_fee_per_gas")?,
        chain_id: row.i64("chain_id")? as u64,
    })
}

// ─── transactions ─────────────────────────────────────────────────────────────

pub fn transaction_select(kind: DbKind) -> String {
    format!(
        "hash, block_hash, {number}, transaction_index, from_address, to_address, {value}, \
         input, nonce, gas, chain_id",
        number = kind.big_column("block_number"),
        value = kind.big_column("value"),
    )
}

pub fn transaction_insert_op(encoder: &BigEncoder, tx: &TransactionRow) -> DbOperation {
    DbOperation::Upsert {
        table: "transactions".into(),
        columns: [
            "hash",
            "block_hash",
            "block_number",
            "transaction_index",
            "from_address",
            "to_address",
            "value",
            "input",
            "nonce",
            "gas",
            "chain_id",
        ]
        .map(String::from)
        .to_vec(),
        values: vec![
            DbValue::Bytes(tx.hash.to_vec()),
            DbValue::Bytes(tx.block_hash.to_vec()),
            encoder.u64(tx.block_number),
            DbValue::Int64(tx.transaction_index as i64),
            DbValue::Bytes(tx.from.to_vec()),
            DbValue::opt_bytes(tx.to.as_ref()),
            encoder.u256(tx.value),
            DbValue::Bytes(tx.input.to_vec()),
            DbValue::Int64(tx.nonce as i64),
            DbValue::Int64(tx.gas as i64),
            DbValue::Int64(tx.chain_id as i64),
        ],
        conflict_columns: vec!["hash".into()],
        update_columns: vec![],
    }
}

pub fn decode_transaction(encoder: &BigEncoder, row: &DbRow) -> Result<TransactionRow, StoreError> {
    Ok(TransactionRow {
        hash: b256(row, "hash")?,
        block_hash: b256(row, "block_hash")?,
        block_number: encoder.row_u64(row, "block_number")?,
        transaction_index: row.i64("transaction_index")? as u64,
        from: address(row, "from_address")?,
        to: opt_address(row, "to_address")?,
        value: encoder.row_u256(row, "value")?,
        input: Bytes::from(row.bytes("input")?.to_vec()),
        nonce: row.i64("nonce")? as u64,
        gas: row.i64("gas")? as u64,
        chain_id: row.i64("chain_id")? as u64,
    })
}

// ─── transaction receipts ─────────────────────────────────────────────────────

pub fn receipt_select(kind: DbKind) -> String {
    format!(
        "transaction_hash, block_hash, {number}, transaction_index, from_address, to_address, \
         contract_address, cumulative_gas_used, gas_used, status, chain_id",
        number = kind.big_column("block_number"),
    )
}

pub fn receipt_insert_op(encoder: &BigEncoder, receipt: &TransactionReceiptRow) -> DbOperation {
    DbOperation::Upsert {
        table: "transaction_receipts".into(),
        columns: [
            "transaction_hash",
            "block_hash",
            "block_number",
            "transaction_index",
            "from_address",
            "to_address",
            "contract_address",
            "cumulative_gas_used",
            "gas_used",
            "status",
            "chain_id",
        ]
        .map(String::from)
        .to_vec(),
        values: vec![
            DbValue::Bytes(receipt.transaction_hash.to_vec()),
            DbValue::Bytes(receipt.block_hash.to_vec()),
            encoder.u64(receipt.block_number),
            DbValue::Int64(receipt.transaction_index as i64),
            DbValue::Bytes(receipt.from.to_vec()),
            DbValue::opt_bytes(receipt.to.as_ref()),
            DbValue::opt_bytes(receipt.contract_address.as_ref()),
            DbValue::Int64(receipt.cumulative_gas_used as i64),
            DbValue::Int64(receipt.gas_used as i64),
            DbValue::Bool(receipt.status),
            DbValue::Int64(receipt.chain_id as i64),
        ],
        conflict_columns: vec!["transaction_hash".into()],
        update_columns: vec![],
    }
}

pub fn decode_receipt(
    encoder: &BigEncoder,
    row: &DbRow,
) -> Result<TransactionReceiptRow, StoreError> {
    Ok(TransactionReceiptRow {
        transaction_hash: b256(row, "transaction_hash")?,
        block_hash: b256(row, "block_hash")?,
        block_number: encoder.row_u64(row, "block_number")?,
        transaction_index: row.i64("transaction_index")? as u64,
        from: address(row, "from_address")?,
        to: opt_address(row, "to_address")?,
        contract_address: opt_address(row, "contract_address")?,
        cumulative_gas_used: row.i64("cumulative_gas_used")? as u64,
        gas_used: row.i64("gas_used")? as u64,
        status: row.bool("status")?,
        chain_id: row.i64("chain_id")? as u64,
    })
}

// ─── logs ─────────────────────────────────────────────────────────────────────

pub fn log_select(kind: DbKind) -> String {
    format!(
        "id, chain_id, block_hash, {number}, transaction_hash, transaction_index, log_index, \
         address, topic0, topic1, topic2, topic3, data, checkpoint",
        number = kind.big_column("block_number"),
    )
}

pub fn log_insert_op(encoder: &BigEncoder, log: &LogRow) -> DbOperation {
    DbOperation::Upsert {
        table: "logs".into(),
        columns: [
            "id",
            "chain_id",
            "block_hash",
            "block_number",
            "transaction_hash",
            "transaction_index",
            "log_index",
            "address",
            "topic0",
            "topic1",
            "topic2",
            "topic3",
            "data",
            "checkpoint",
        ]
        .map(String::from)
        .to_vec(),
        values: vec![
            DbValue::Text(log.id.clone()),
            DbValue::Int64(log.chain_id as i64),
            DbValue::Bytes(log.block_hash.to_vec()),
            encoder.u64(log.block_number),
            DbValue::Bytes(log.transaction_hash.to_vec()),
            DbValue::Int64(log.transaction_index as i64),
            DbValue::Int64(log.log_index as i64),
            DbValue::Bytes(log.address.to_vec()),
            DbValue::opt_bytes(log.topics[0].as_ref()),
            DbValue::opt_bytes(log.topics[1].as_ref()),
            DbValue::opt_bytes(log.topics[2].as_ref()),
            DbValue::opt_bytes(log.topics[3].as_ref()),
            DbValue::Bytes(log.data.to_vec()),
            DbValue::Text(log.checkpoint.encode()),
        ],
        conflict_columns: vec!["id".into()],
        // A re-sync after a reorg can place the same log id at a new
        // position in the order.
        update_columns: vec!["checkpoint".into(), "block_hash".into()],
    }
}

pub fn decode_log(encoder: &BigEncoder, row: &DbRow) -> Result<LogRow, StoreError> {
    Ok(LogRow {
        id: row.text("id")?.to_string(),
        chain_id: row.i64("chain_id")? as u64,
        block_hash: b256(row, "block_hash")?,
        block_number: encoder.row_u64(row, "block_number")?,
        transaction_hash: b256(row, "transaction_hash")?,
        transaction_index: row.i64("transaction_index")? as u64,
        log_index: row.i64("log_index")? as u64,
        address: address(row, "address")?,
        topics: [
            opt_b256(row, "topic0")?,
            opt_b256(row, "topic1")?,
            opt_b256(row, "topic2")?,
            opt_b256(row, "topic3")?,
        ],
        data: Bytes::from(row.bytes("data")?.to_vec()),
        checkpoint: checkpoint(row, "checkpoint")?,
    })
}

// ─── call traces ──────────────────────────────────────────────────────────────

pub fn trace_select(kind: DbKind) -> String {
    format!(
        "id, chain_id, block_hash, {number}, transaction_hash, transaction_position, \
         trace_address, from_address, to_address, input, output, {value}, gas, gas_used, \
         subtraces, call_type, error, checkpoint",
        number = kind.big_column("block_number"),
        value = kind.big_column("value"),
    )
}

pub fn trace_insert_op(encoder: &BigEncoder, trace: &CallTraceRow) -> DbOperation {
    DbOperation::Insert {
        table: "call_traces".into(),
        columns: [
            "id",
            "chain_id",
            "block_hash",
            "block_number",
            "transaction_hash",
            "transaction_position",
            "trace_address",
            "from_address",
            "to_address",
            "input",
            "output",
            "value",
            "gas",
            "gas_used",
            "subtraces",
            "call_type",
            "error",
            "checkpoint",
        ]
        .map(String::from)
        .to_vec(),
        values: vec![
            DbValue::Text(trace.id.clone()),
            DbValue::Int64(trace.chain_id as i64),
            DbValue::Bytes(trace.block_hash.to_vec()),
            encoder.u64(trace.block_number),
            DbValue::Bytes(trace.transaction_hash.to_vec()),
            DbValue::Int64(trace.transaction_position as i64),
            DbValue::json(&trace.trace_address),
            DbValue::Bytes(trace.from.to_vec()),
            DbValue::Bytes(trace.to.to_vec()),
            DbValue::Bytes(trace.input.to_vec()),
            DbValue::opt_bytes(trace.output.as_ref()),
            encoder.u256(trace.value),
            DbValue::Int64(trace.gas as i64),
            DbValue::Int64(trace.gas_used as i64),
            DbValue::Int64(trace.subtraces as i64),
            DbValue::Text(trace.call_type.clone()),
            DbValue::opt_text(trace.error.clone()),
            DbValue::Text(trace.checkpoint.encode()),
        ],
    }
}

pub fn decode_trace(encoder: &BigEncoder, row: &DbRow) -> Result<CallTraceRow, StoreError> {
    let trace_address: Vec<u64> = match row.value("trace_address")? {
        DbValue::Json(json) => serde_json::from_value(json.clone())
            .map_err(|e| StoreError::Decode(format!("invalid trace_address: {e}")))?,
        DbValue::Text(text) => serde_json::from_str(text)
            .map_err(|e| StoreError::Decode(format!("invalid trace_address: {e}")))?,
        other => {
            return Err(StoreError::Decode(format!(
                "unexpected trace_address value: {other:?}"
            )))
        }
    };

    Ok(CallTraceRow {
        id: row.text("id")?.to_string(),
        chain_id: row.i64("chain_id")? as u64,
        block_hash: b256(row, "block_hash")?,
        block_number: encoder.row_u64(row, "block_number")?,
        transaction_hash: b256(row, "transaction_hash")?,
        transaction_position: row.i64("transaction_position")? as u64,
        trace_address,
        from: address(row, "from_address")?,
        to: address(row, "to_address")?,
        input: Bytes::from(row.bytes("input")?.to_vec()),
        output: row.opt_bytes("output")?.map(|b| Bytes::from(b.to_vec())),
        value: encoder.row_u256(row, "value")?,
        gas: row.i64("gas")? as u64,
        gas_used: row.i64("gas_used")? as u64,
        subtraces: row.i64("subtraces")? as u64,
        call_type: row.text("call_type")?.to_string(),
        error: row.opt_text("error")?.map(String::from),
        checkpoint: checkpoint(row, "checkpoint")?,
    })
}
