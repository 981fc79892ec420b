use crate::db::{Db, DbError, DbKind};

// Column type aliases per dialect. Big integers are NUMERIC on PostgreSQL
// and fixed-width zero-padded TEXT on SQLite so that lexicographic order
// equals numeric order (see db::encoding).
struct Dialect {
    big: &'static str,
    bytes: &'static str,
    boolean: &'static str,
    json: &'static str,
    serial_pk: &'static str,
}

fn dialect(kind: DbKind) -> Dialect {
    match kind {
        DbKind::Postgres => Dialect {
            big: "NUMERIC(78)",
            bytes: "BYTEA",
            boolean: "BOOLEAN",
            json: "JSON",
            serial_pk: "BIGSERIAL PRIMARY KEY",
        },
        DbKind::Sqlite => Dialect {
            big: "TEXT",
            bytes: "BLOB",
            boolean: "INTEGER",
            json: "TEXT",
            serial_pk: "INTEGER PRIMARY KEY AUTOINCREMENT",
        },
    }
}

/// Create the sync tables if they do not exist. Idempotent; run once at
/// store construction.
pub async fn migrate(db: &Db) -> Result<(), DbError> {
    let d = dialect(db.kind());

    let statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash {bytes} PRIMARY KEY,
                parent_hash {bytes} NOT NULL,
                number {big} NOT NULL,
                timestamp {big} NOT NULL,
                nonce {big} NOT NULL,
                miner {bytes} NOT NULL,
                gas_limit BIGINT NOT NULL,
                gas_used BIGINT NOT NULL,
                base_fee_per_gas {big},
                chain_id BIGINT NOT NULL,
                checkpoint TEXT NOT NULL
            )",
            bytes = d.bytes,
            big = d.big,
        ),
        "CREATE INDEX IF NOT EXISTS blocks_chain_number ON blocks (chain_id, number)".to_string(),
        "CREATE INDEX IF NOT EXISTS blocks_checkpoint ON blocks (chain_id, checkpoint)".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS transactions (
                hash {bytes} PRIMARY KEY,
                block_hash {bytes} NOT NULL,
                block_number {big} NOT NULL,
                transaction_index BIGINT NOT NULL,
                from_address {bytes} NOT NULL,
                to_address {bytes},
                value {big} NOT NULL,
                input {bytes} NOT NULL,
                nonce BIGINT NOT NULL,
                gas BIGINT NOT NULL,
                chain_id BIGINT NOT NULL
            )",
            bytes = d.bytes,
            big = d.big,
        ),
        "CREATE INDEX IF NOT EXISTS transactions_chain_number ON transactions (chain_id, block_number)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS transaction_receipts (
                transaction_hash {bytes} PRIMARY KEY,
                block_hash {bytes} NOT NULL,
                block_number {big} NOT NULL,
                transaction_index BIGINT NOT NULL,
                from_address {bytes} NOT NULL,
                to_address {bytes},
                contract_address {bytes},
                cumulative_gas_used BIGINT NOT NULL,
                gas_used BIGINT NOT NULL,
                status {boolean} NOT NULL,
                chain_id BIGINT NOT NULL
            )",
            bytes = d.bytes,
            big = d.big,
            boolean = d.boolean,
        ),
        "CREATE INDEX IF NOT EXISTS transaction_receipts_chain_number ON transaction_receipts (chain_id, block_number)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_hash {bytes} NOT NULL,
                block_number {big} NOT NULL,
                transaction_hash {bytes} NOT NULL,
                transaction_index BIGINT NOT NULL,
                log_index BIGINT NOT NULL,
                address {bytes} NOT NULL,
                topic0 {bytes},
                topic1 {bytes},
                topic2 {bytes},
                topic3 {bytes},
                data {bytes} NOT NULL,
                checkpoint TEXT NOT NULL
            )",
            bytes = d.bytes,
            big = d.big,
        ),
        "CREATE INDEX IF NOT EXISTS logs_chain_checkpoint ON logs (chain_id, checkpoint)".to_string(),
        "CREATE INDEX IF NOT EXISTS logs_factory_scan ON logs (chain_id, address, topic0)".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS call_traces (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_hash {bytes} NOT NULL,
                block_number {big} NOT NULL,
                transaction_hash {bytes} NOT NULL,
                transaction_position BIGINT NOT NULL,
                trace_address {json} NOT NULL,
                from_address {bytes} NOT NULL,
                to_address {bytes} NOT NULL,
                input {bytes} NOT NULL,
                output {bytes},
                value {big} NOT NULL,
                gas BIGINT NOT NULL,
                gas_used BIGINT NOT NULL,
                subtraces BIGINT NOT NULL,
                call_type TEXT NOT NULL,
                error TEXT,
                checkpoint TEXT NOT NULL
            )",
            bytes = d.bytes,
            big = d.big,
            json = d.json,
        ),
        "CREATE INDEX IF NOT EXISTS call_traces_chain_checkpoint ON call_traces (chain_id, checkpoint)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS call_traces_tx ON call_traces (chain_id, transaction_hash)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS rpc_request_results (
                request TEXT NOT NULL,
                chain_id BIGINT NOT NULL,
                block_number {big} NOT NULL,
                result TEXT NOT NULL,
                PRIMARY KEY (request, chain_id, block_number)
            )",
            big = d.big,
        ),
        // Filter fragment tables: insert-once rows keyed by the canonical
        // fragment id.
        format!(
            "CREATE TABLE IF NOT EXISTS log_filters (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                address {bytes},
                topic0 {bytes},
                topic1 {bytes},
                topic2 {bytes},
                topic3 {bytes},
                include_receipts {boolean} NOT NULL
            )",
            bytes = d.bytes,
            boolean = d.boolean,
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS factory_log_filters (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                factory_address {bytes} NOT NULL,
                event_selector {bytes} NOT NULL,
                child_address_location TEXT NOT NULL,
                topic0 {bytes},
                topic1 {bytes},
                topic2 {bytes},
                topic3 {bytes},
                include_receipts {boolean} NOT NULL
            )",
            bytes = d.bytes,
            boolean = d.boolean,
        ),
        "CREATE TABLE IF NOT EXISTS block_filters (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_interval BIGINT NOT NULL,
                block_offset BIGINT NOT NULL
            )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS trace_filters (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                from_address {bytes},
                to_address {bytes}
            )",
            bytes = d.bytes,
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS factory_trace_filters (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                factory_address {bytes} NOT NULL,
                event_selector {bytes} NOT NULL,
                child_address_location TEXT NOT NULL,
                from_address {bytes}
            )",
            bytes = d.bytes,
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS _chainsync_meta (
                key TEXT PRIMARY KEY,
                value {json}
            )",
            json = d.json,
        ),
    ];

    let mut all = statements;
    for table in INTERVAL_TABLES {
        all.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id {serial_pk},
                filter_id TEXT NOT NULL,
                start_block {big} NOT NULL,
                end_block {big} NOT NULL
            )",
            serial_pk = d.serial_pk,
            big = d.big,
        ));
        all.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_filter ON {table} (filter_id)"
        ));
    }

    for statement in all {
        db.batch_execute(&statement).await?;
    }

    tracing::info!("Sync store schema is up to date");
    Ok(())
}

pub const INTERVAL_TABLES: [&str; 5] = [
    "log_filter_intervals",
    "factory_log_filter_intervals",
    "block_filter_intervals",
    "trace_filter_intervals",
    "factory_trace_filter_intervals",
];
