use std::collections::{HashMap, HashSet};

use alloy::primitives::B256;

use crate::db::{DbKind, DbValue};
use crate::types::checkpoint::Checkpoint;
use crate::types::event::{EventPayload, RawEvent};
use crate::types::filter::{
    AddressSpec, CallTraceFilter, ChildAddressLocation, Factory, Filter, LogFilter, TopicSlot,
};

use super::error::StoreError;
use super::rows;
use super::SyncStore;

pub struct GetEventsArgs<'a> {
    pub filters: &'a [Filter],
    /// Exclusive lower bound.
    pub from: Checkpoint,
    /// Inclusive upper bound.
    pub to: Checkpoint,
    pub limit: usize,
}

pub struct EventsBatch {
    pub events: Vec<RawEvent>,
    /// `to` when the batch was not full, otherwise the checkpoint of the
    /// last returned event. Feed back as the next call's `from`.
    pub cursor: Checkpoint,
}

/// Incremental WHERE-clause builder tracking bind positions.
struct Conditions {
    kind: DbKind,
    parts: Vec<String>,
    params: Vec<DbValue>,
}

impl Conditions {
    fn new(kind: DbKind) -> Self {
        Self {
            kind,
            parts: Vec::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: DbValue) -> String {
        let placeholder = self.kind.placeholder_for(self.params.len() + 1, &value);
        self.params.push(value);
        placeholder
    }

    fn eq(&mut self, expr: &str, value: DbValue) {
        let placeholder = self.bind(value);
        self.parts.push(format!("{expr} = {placeholder}"));
    }

    fn in_list(&mut self, expr: &str, values: Vec<DbValue>) {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        self.parts.push(format!("{expr} IN ({})", placeholders.join(", ")));
    }

    fn raw(&mut self, condition: String) {
        self.parts.push(condition);
    }

    fn where_sql(&self) -> String {
        self.parts.join(" AND ")
    }
}

/// SQL expression extracting a child address from a factory source log.
fn child_address_expr(kind: DbKind, location: &ChildAddressLocation) -> String {
    let (column, start) = match location {
        ChildAddressLocation::Topic1 => ("topic1", 13),
        ChildAddressLocation::Topic2 => ("topic2", 13),
        ChildAddressLocation::Topic3 => ("topic3", 13),
        ChildAddressLocation::DataOffset(offset) => ("data", offset + 13),
    };
    match kind {
        DbKind::Sqlite => format!("substr({column}, {start}, 20)"),
        DbKind::Postgres => format!("substring({column} from {start} for 20)"),
    }
}

/// `address IN (<child addresses of factory>)`.
fn push_factory_condition(conditions: &mut Conditions, column: &str, factory: &Factory) {
    let expr = child_address_expr(conditions.kind, &factory.child_address_location);
    let chain = conditions.bind(DbValue::Int64(factory.chain_id as i64));
    let address = conditions.bind(DbValue::Bytes(factory.address.to_vec()));
    let selector = conditions.bind(DbValue::Bytes(factory.event_selector.to_vec()));
    conditions.raw(format!(
        "{column} IN (SELECT {expr} FROM logs WHERE chain_id = {chain} \
         AND address = {address} AND topic0 = {selector})"
    ));
}

fn push_address_condition(conditions: &mut Conditions, column: &str, spec: &AddressSpec) {
    match spec {
        AddressSpec::Any => {}
        AddressSpec::Single(address) => {
            conditions.eq(column, DbValue::Bytes(address.to_vec()));
        }
        AddressSpec::List(addresses) => {
            conditions.in_list(
                column,
                addresses.iter().map(|a| DbValue::Bytes(a.to_vec())).collect(),
            );
        }
        AddressSpec::Factory(factory) => push_factory_condition(conditions, column, factory),
    }
}

fn push_block_range(
    conditions: &mut Conditions,
    store: &SyncStore,
    column: &str,
    from_block: u64,
    to_block: Option<u64>,
) {
    let from = store.encoder().u64(from_block);
    let placeholder = conditions.bind(from);
    conditions.raw(format!("{column} >= {placeholder}"));
    if let Some(to_block) = to_block {
        let to = store.encoder().u64(to_block);
        let placeholder = conditions.bind(to);
        conditions.raw(format!("{column} <= {placeholder}"));
    }
}

fn push_checkpoint_window(conditions: &mut Conditions, from: &Checkpoint, to: &Checkpoint) {
    let lower = conditions.bind(DbValue::Text(from.encode()));
    conditions.raw(format!("checkpoint > {lower}"));
    let upper = conditions.bind(DbValue::Text(to.encode()));
    conditions.raw(format!("checkpoint <= {upper}"));
}

/// Key of one candidate event prior to payload assembly.
#[derive(Debug)]
enum EventKey {
    Block { hash: B256 },
    Log { id: String, include_receipt: bool },
    Trace { id: String },
}

struct Candidate {
    checkpoint: Checkpoint,
    filter_index: usize,
    key: EventKey,
}

fn log_filter_query(
    store: &SyncStore,
    filter: &LogFilter,
    from: &Checkpoint,
    to: &Checkpoint,
    limit: usize,
) -> (String, Vec<DbValue>) {
    let mut conditions = Conditions::new(store.db().kind());
    conditions.eq("chain_id", DbValue::Int64(filter.chain_id as i64));
    push_address_condition(&mut conditions, "address", &filter.address);
    for (i, slot) in filter.topics.iter().enumerate() {
        let column = format!("topic{i}");
        match slot {
            TopicSlot::Any => {}
            TopicSlot::One(value) => conditions.eq(&column, DbValue::Bytes(value.to_vec())),
            TopicSlot::OneOf(values) => conditions.in_list(
                &column,
                values.iter().map(|v| DbValue::Bytes(v.to_vec())).collect(),
            ),
        }
    }
    push_block_range(&mut conditions, store, "block_number", filter.from_block, filter.to_block);
    push_checkpoint_window(&mut conditions, from, to);

    let sql = format!(
        "SELECT id, checkpoint FROM logs WHERE {} ORDER BY checkpoint ASC LIMIT {limit}",
        conditions.where_sql(),
    );
    (sql, conditions.params)
}

fn block_filter_query(
    store: &SyncStore,
    chain_id: u64,
    interval: u64,
    offset: u64,
    from_block: u64,
    to_block: Option<u64>,
    from: &Checkpoint,
    to: &Checkpoint,
    limit: usize,
) -> (String, Vec<DbValue>) {
    let kind = store.db().kind();
    let mut conditions = Conditions::new(kind);
    conditions.eq("chain_id", DbValue::Int64(chain_id as i64));

    // `(number - offset) % interval == 0`, computed on the numeric value.
    let number_expr = match kind {
        DbKind::Sqlite => "CAST(number AS INTEGER)",
        DbKind::Postgres => "number::bigint",
    };
    let interval_bind = conditions.bind(DbValue::Int64(interval as i64));
    let offset_bind = conditions.bind(DbValue::Int64(offset as i64));
    conditions.raw(format!(
        "({number_expr} - {offset_bind}) % {interval_bind} = 0"
    ));

    push_block_range(&mut conditions, store, "number", from_block, to_block);
    push_checkpoint_window(&mut conditions, from, to);

    let sql = format!(
        "SELECT hash, checkpoint FROM blocks WHERE {} ORDER BY checkpoint ASC LIMIT {limit}",
        conditions.where_sql(),
    );
    (sql, conditions.params)
}

fn trace_filter_query(
    store: &SyncStore,
    filter: &CallTraceFilter,
    from: &Checkpoint,
    to: &Checkpoint,
    limit: usize,
) -> (String, Vec<DbValue>) {
    let kind = store.db().kind();
    let mut conditions = Conditions::new(kind);
    conditions.eq("chain_id", DbValue::Int64(filter.chain_id as i64));

    if let Some(from_addresses) = &filter.from_address {
        conditions.in_list(
            "from_address",
            from_addresses.iter().map(|a| DbValue::Bytes(a.to_vec())).collect(),
        );
    }
    push_address_condition(&mut conditions, "to_address", &filter.to_address);

    if !filter.function_selectors.is_empty() {
        let selector_expr = match kind {
            DbKind::Sqlite => "substr(input, 1, 4)",
            DbKind::Postgres => "substring(input from 1 for 4)",
        };
        conditions.in_list(
            selector_expr,
            filter
                .function_selectors
                .iter()
                .map(|s| DbValue::Bytes(s.to_vec()))
                .collect(),
        );
    }

    push_block_range(&mut conditions, store, "block_number", filter.from_block, filter.to_block);
    push_checkpoint_window(&mut conditions, from, to);

    let sql = format!(
        "SELECT id, checkpoint FROM call_traces WHERE {} ORDER BY checkpoint ASC LIMIT {limit}",
        conditions.where_sql(),
    );
    (sql, conditions.params)
}

pub async fn get_events(
    store: &SyncStore,
    args: GetEventsArgs<'_>,
) -> Result<EventsBatch, StoreError> {
    let mut candidates: Vec<Candidate> = Vec::new();

    // One ordered key scan per filter; the per-filter limit is sound because
    // the merged result is truncated to the same limit.
    for (filter_index, filter) in args.filters.iter().enumerate() {
        let (sql, params, kind_is_block) = match filter {
            Filter::Log(f) => {
                let (sql, params) = log_filter_query(store, f, &args.from, &args.to, args.limit);
                (sql, params, false)
            }
            Filter::Block(f) => {
                let (sql, params) = block_filter_query(
                    store,
                    f.chain_id,
                    f.interval,
                    f.offset,
                    f.from_block,
                    f.to_block,
                    &args.from,
                    &args.to,
                    args.limit,
                );
                (sql, params, true)
            }
            Filter::CallTrace(f) => {
                let (sql, params) = trace_filter_query(store, f, &args.from, &args.to, args.limit);
                (sql, params, false)
            }
        };

        let rows = store.db().query(&sql, &params).await?;
        for row in &rows {
            let checkpoint_text = row.text("checkpoint")?;
            let checkpoint = Checkpoint::decode(checkpoint_text).ok_or_else(|| {
                StoreError::Decode(format!("invalid checkpoint '{checkpoint_text}'"))
            })?;
            let key = match filter {
                Filter::Log(f) => EventKey::Log {
                    id: row.text("id")?.to_string(),
                    include_receipt: f.include_receipts,
                },
                Filter::Block(_) => {
                    debug_assert!(kind_is_block);
                    let hash = row.bytes("hash")?;
                    EventKey::Block {
                        hash: B256::from_slice(hash),
                    }
                }
                Filter::CallTrace(_) => EventKey::Trace {
                    id: row.text("id")?.to_string(),
                },
            };
            candidates.push(Candidate {
                checkpoint,
                filter_index,
                key,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.checkpoint
            .cmp(&b.checkpoint)
            .then(a.filter_index.cmp(&b.filter_index))
    });
    candidates.truncate(args.limit);

    let cursor = if candidates.len() < args.limit {
        args.to
    } else {
        candidates.last().map(|c| c.checkpoint).unwrap_or(args.to)
    };

    let events = assemble_payloads(store, &candidates).await?;
    Ok(EventsBatch { events, cursor })
}

async fn assemble_payloads(
    store: &SyncStore,
    candidates: &[Candidate],
) -> Result<Vec<RawEvent>, StoreError> {
    let mut log_ids: HashSet<&str> = HashSet::new();
    let mut trace_ids: HashSet<&str> = HashSet::new();
    let mut block_hashes: HashSet<B256> = HashSet::new();

    for candidate in candidates {
        match &candidate.key {
            EventKey::Block { hash } => {
                block_hashes.insert(*hash);
            }
            EventKey::Log { id, .. } => {
                log_ids.insert(id);
            }
            EventKey::Trace { id } => {
                trace_ids.insert(id);
            }
        }
    }

    let logs = fetch_logs(store, &log_ids).await?;
    let traces = fetch_traces(store, &trace_ids).await?;

    let mut transaction_hashes: HashSet<B256> = HashSet::new();
    let mut receipt_hashes: HashSet<B256> = HashSet::new();
    for log in logs.values() {
        block_hashes.insert(log.block_hash);
        transaction_hashes.insert(log.transaction_hash);
    }
    for candidate in candidates {
        if let EventKey::Log {
            id,
            include_receipt: true,
        } = &candidate.key
        {
            if let Some(log) = logs.get(id.as_str()) {
                receipt_hashes.insert(log.transaction_hash);
            }
        }
    }
    for trace in traces.values() {
        block_hashes.insert(trace.block_hash);
        transaction_hashes.insert(trace.transaction_hash);
    }

    let blocks = fetch_blocks(store, &block_hashes).await?;
    let transactions = fetch_transactions(store, &transaction_hashes).await?;
    let receipts = fetch_receipts(store, &receipt_hashes).await?;

    let mut events = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let payload = match &candidate.key {
            EventKey::Block { hash } => {
                let block = blocks
                    .get(hash)
                    .ok_or_else(|| StoreError::Decode(format!("missing block {hash}")))?;
                EventPayload::Block {
                    block: block.clone(),
                }
            }
            EventKey::Log {
                id,
                include_receipt,
            } => {
                let log = logs
                    .get(id.as_str())
                    .ok_or_else(|| StoreError::Decode(format!("missing log {id}")))?;
                let block = blocks.get(&log.block_hash).ok_or_else(|| {
                    StoreError::Decode(format!("missing block for log {id}"))
                })?;
                let transaction = transactions.get(&log.transaction_hash).ok_or_else(|| {
                    StoreError::Decode(format!("missing transaction for log {id}"))
                })?;
                let receipt = if *include_receipt {
                    receipts.get(&log.transaction_hash).cloned()
                } else {
                    None
                };
                EventPayload::Log {
                    log: log.clone(),
                    block: block.clone(),
                    transaction: transaction.clone(),
                    receipt,
                }
            }
            EventKey::Trace { id } => {
                let trace = traces
                    .get(id.as_str())
                    .ok_or_else(|| StoreError::Decode(format!("missing call trace {id}")))?;
                let block = blocks.get(&trace.block_hash).ok_or_else(|| {
                    StoreError::Decode(format!("missing block for trace {id}"))
                })?;
                let transaction = transactions.get(&trace.transaction_hash).ok_or_else(|| {
                    StoreError::Decode(format!("missing transaction for trace {id}"))
                })?;
                EventPayload::Call {
                    trace: trace.clone(),
                    block: block.clone(),
                    transaction: transaction.clone(),
                }
            }
        };

        events.push(RawEvent {
            filter_index: candidate.filter_index,
            chain_id: candidate.checkpoint.chain_id,
            checkpoint: candidate.checkpoint,
            payload,
        });
    }
    Ok(events)
}

async fn fetch_logs(
    store: &SyncStore,
    ids: &HashSet<&str>,
) -> Result<HashMap<String, crate::types::event::LogRow>, StoreError> {
    let mut result = HashMap::new();
    if ids.is_empty() {
        return Ok(result);
    }
    let kind = store.db().kind();
    let params: Vec<DbValue> = ids.iter().map(|id| DbValue::Text(id.to_string())).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|i| kind.placeholder(i)).collect();
    let sql = format!(
        "SELECT {} FROM logs WHERE id IN ({})",
        rows::log_select(kind),
        placeholders.join(", "),
    );
    for row in &store.db().query(&sql, &params).await? {
        let log = rows::decode_log(store.encoder(), row)?;
        result.insert(log.id.clone(), log);
    }
    Ok(result)
}

async fn fetch_traces(
    store: &SyncStore,
    ids: &HashSet<&str>,
) -> Result<HashMap<String, crate::types::event::CallTraceRow>, StoreError> {
    let mut result = HashMap::new();
    if ids.is_empty() {
        return Ok(result);
    }
    let kind = store.db().kind();
    let params: Vec<DbValue> = ids.iter().map(|id| DbValue::Text(id.to_string())).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|i| kind.placeholder(i)).collect();
    let sql = format!(
        "SELECT {} FROM call_traces WHERE id IN ({})",
        rows::trace_select(kind),
        placeholders.join(", "),
    );
    for row in &store.db().query(&sql, &params).await? {
        let trace = rows::decode_trace(store.encoder(), row)?;
        result.insert(trace.id.clone(), trace);
    }
    Ok(result)
}

async fn fetch_blocks(
    store: &SyncStore,
    hashes: &HashSet<B256>,
) -> Result<HashMap<B256, crate::types::event::BlockRow>, StoreError> {
    let mut result = HashMap::new();
    if hashes.is_empty() {
        return Ok(result);
    }
    let kind = store.db().kind();
    let params: Vec<DbValue> = hashes.iter().map(|h| DbValue::Bytes(h.to_vec())).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|i| kind.placeholder(i)).collect();
    let sql = format!(
        "SELECT {} FROM blocks WHERE hash IN ({})",
        rows::block_select(kind),
        placeholders.join(", "),
    );
    for row in &store.db().query(&sql, &params).await? {
        let block = rows::decode_block(store.encoder(), row)?;
        result.insert(block.hash, block);
    }
    Ok(result)
}

async fn fetch_transactions(
    store: &SyncStore,
    hashes: &HashSet<B256>,
) -> Result<HashMap<B256, crate::types::event::TransactionRow>, StoreError> {
    let mut result = HashMap::new();
    if hashes.is_empty() {
        return Ok(result);
    }
    let kind = store.db().kind();
    let params: Vec<DbValue> = hashes.iter().map(|h| DbValue::Bytes(h.to_vec())).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|i| kind.placeholder(i)).collect();
    let sql = format!(
        "SELECT {} FROM transactions WHERE hash IN ({})",
        rows::transaction_select(kind),
        placeholders.join(", "),
    );
    for row in &store.db().query(&sql, &params).await? {
        let tx = rows::decode_transaction(store.encoder(), row)?;
        result.insert(tx.hash, tx);
    }
    Ok(result)
}

async fn fetch_receipts(
    store: &SyncStore,
    hashes: &HashSet<B256>,
) -> Result<HashMap<B256, crate::types::event::TransactionReceiptRow>, StoreError> {
    let mut result = HashMap::new();
    if hashes.is_empty() {
        return Ok(result);
    }
    let kind = store.db().kind();
    let params: Vec<DbValue> = hashes.iter().map(|h| DbValue::Bytes(h.to_vec())).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|i| kind.placeholder(i)).collect();
    let sql = format!(
        "SELECT {} FROM transaction_receipts WHERE transaction_hash IN ({})",
        rows::receipt_select(kind),
        placeholders.join(", "),
    );
    for row in &store.db().query(&sql, &params).await? {
        let receipt = rows::decode_receipt(store.encoder(), row)?;
        result.insert(receipt.transaction_hash, receipt);
    }
    Ok(result)
}
