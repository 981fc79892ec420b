use crate::db::{Db, DbOperation, DbValue};
use crate::types::filter::{Filter, FilterFragment};
use crate::types::interval::{interval_intersection_many, interval_union, Interval};

use super::error::StoreError;

/// Hard cap on stored interval rows per fragment. Reaching it during a
/// merge pass means coverage bookkeeping degenerated into unmergeable
/// shards, which is fatal (see `StoreError::FragmentationLimit`).
pub const MAX_FRAGMENT_INTERVALS: usize = 1_000;

/// `(fragment table, interval table)` for a fragment kind.
pub fn fragment_tables(fragment: &FilterFragment) -> (&'static str, &'static str) {
    match fragment {
        FilterFragment::Log(_) => ("log_filters", "log_filter_intervals"),
        FilterFragment::FactoryLog(_) => ("factory_log_filters", "factory_log_filter_intervals"),
        FilterFragment::Block(_) => ("block_filters", "block_filter_intervals"),
        FilterFragment::Trace(_) => ("trace_filters", "trace_filter_intervals"),
        FilterFragment::FactoryTrace(_) => ("factory_trace_filters", "factory_trace_filter_intervals"),
    }
}

fn opt_bytes(value: &Option<impl AsRef<[u8]>>) -> DbValue {
    match value {
        Some(v) => DbValue::Bytes(v.as_ref().to_vec()),
        None => DbValue::Null,
    }
}

/// Fragment rows are insert-once: the id is canonical, so a later insert of
/// the same fragment is a no-op.
pub fn fragment_insert_op(fragment: &FilterFragment) -> DbOperation {
    let (table, _) = fragment_tables(fragment);
    let id = fragment.id();

    let (columns, values): (Vec<&str>, Vec<DbValue>) = match fragment {
        FilterFragment::Log(f) => (
            vec![
                "id", "chain_id", "address", "topic0", "topic1", "topic2", "topic3",
                "include_receipts",
            ],
            vec![
                DbValue::Text(id.clone()),
                DbValue::Int64(f.chain_id as i64),
                opt_bytes(&f.address),
                opt_bytes(&f.topics[0]),
                opt_bytes(&f.topics[1]),
                opt_bytes(&f.topics[2]),
                opt_bytes(&f.topics[3]),
                DbValue::Bool(f.include_receipts),
            ],
        ),
        FilterFragment::FactoryLog(f) => (
            vec![
                "id",
                "chain_id",
                "factory_address",
                "event_selector",
                "child_address_location",
                "topic0",
                "topic1",
                "topic2",
                "topic3",
                "include_receipts",
            ],
            vec![
                DbValue::Text(id.clone()),
                DbValue::Int64(f.chain_id as i64),
                DbValue::Bytes(f.factory.address.to_vec()),
                DbValue::Bytes(f.factory.event_selector.to_vec()),
                DbValue::Text(f.factory.child_address_location.id_part()),
                opt_bytes(&f.topics[0]),
                opt_bytes(&f.topics[1]),
                opt_bytes(&f.topics[2]),
                opt_bytes(&f.topics[3]),
                DbValue::Bool(f.include_receipts),
            ],
        ),
        FilterFragment::Block(f) => (
            vec!["id", "chain_id", "block_interval", "block_offset"],
            vec![
                DbValue::Text(id.clone()),
                DbValue::Int64(f.chain_id as i64),
                DbValue::Int64(f.interval as i64),
                DbValue::Int64(f.offset as i64),
            ],
        ),
        FilterFragment::Trace(f) => (
            vec!["id", "chain_id", "from_address", "to_address"],
            vec![
                DbValue::Text(id.clone()),
                DbValue::Int64(f.chain_id as i64),
                opt_bytes(&f.from_address),
                opt_bytes(&f.to_address),
            ],
        ),
        FilterFragment::FactoryTrace(f) => (
            vec![
                "id",
                "chain_id",
                "factory_address",
                "event_selector",
                "child_address_location",
                "from_address",
            ],
            vec![
                DbValue::Text(id.clone()),
                DbValue::Int64(f.chain_id as i64),
                DbValue::Bytes(f.factory.address.to_vec()),
                DbValue::Bytes(f.factory.event_selector.to_vec()),
                DbValue::Text(f.factory.child_address_location.id_part()),
                opt_bytes(&f.from_address),
            ],
        ),
    };

    DbOperation::Upsert {
        table: table.to_string(),
        columns: columns.into_iter().map(String::from).collect(),
        values,
        conflict_columns: vec!["id".to_string()],
        update_columns: vec![],
    }
}

/// Record that `interval` is synced for every fragment of `filter`.
///
/// Per fragment, one transaction runs the merge protocol: delete up to
/// `MAX_FRAGMENT_INTERVALS` rows for the fragment, union the deleted set
/// with the new interval, reinsert the normalized result. A full-batch
/// delete means more rows remain, so the pass repeats; a pass whose merged
/// result still fills the cap fails fatally.
pub async fn insert_interval(db: &Db, filter: &Filter, interval: Interval) -> Result<(), StoreError> {
    let encoder = db.encoder();

    for fragment in filter.fragments() {
        let (_, interval_table) = fragment_tables(&fragment);
        let fragment_id = fragment.id();

        db.execute_transaction(vec![fragment_insert_op(&fragment)]).await?;

        let mut pending = vec![interval];
        loop {
            let tx = db.begin().await?;

            let limit = MAX_FRAGMENT_INTERVALS;
            let delete_sql = format!(
                "DELETE FROM {table} WHERE id IN \
                 (SELECT id FROM {table} WHERE filter_id = {p1} LIMIT {limit}) \
                 RETURNING {start}, {end}",
                table = interval_table,
                p1 = db.kind().placeholder(1),
                start = db.kind().big_column("start_block"),
                end = db.kind().big_column("end_block"),
            );
            let deleted = match tx
                .query(&delete_sql, &[DbValue::Text(fragment_id.clone())])
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            };

            let mut merged = pending.clone();
            for row in &deleted {
                let start = encoder.row_u64(row, "start_block")?;
                let end = encoder.row_u64(row, "end_block")?;
                merged.push(Interval::new(start, end));
            }
            let merged = interval_union(&merged);

            if merged.len() >= MAX_FRAGMENT_INTERVALS {
                tx.rollback().await?;
                return Err(StoreError::FragmentationLimit {
                    fragment_id,
                    max: MAX_FRAGMENT_INTERVALS,
                });
            }

            for piece in &merged {
                let insert_sql = format!(
                    "INSERT INTO {table} (filter_id, start_block, end_block) \
                     VALUES ({p1}, {p2}, {p3})",
                    table = interval_table,
                    p1 = db.kind().placeholder_for(1, &DbValue::Text(String::new())),
                    p2 = db.kind().placeholder_for(2, &encoder.u64(piece.start)),
                    p3 = db.kind().placeholder_for(3, &encoder.u64(piece.end)),
                );
                if let Err(e) = tx
                    .execute(
                        &insert_sql,
                        &[
                            DbValue::Text(fragment_id.clone()),
                            encoder.u64(piece.start),
                            encoder.u64(piece.end),
                        ],
                    )
                    .await
                {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            }

            tx.commit().await?;

            if deleted.len() < MAX_FRAGMENT_INTERVALS {
                break;
            }
            // More rows remained beyond the delete batch; the merged rows
            // are persisted, so the next pass folds them in again.
            pending.clear();
        }
    }

    Ok(())
}

/// Synced coverage for `filter`: the intersection, across its fragments, of
/// each fragment's stored interval union.
pub async fn get_intervals(db: &Db, filter: &Filter) -> Result<Vec<Interval>, StoreError> {
    let encoder = db.encoder();
    let mut per_fragment: Vec<Vec<Interval>> = Vec::new();

    for fragment in filter.fragments() {
        let (_, interval_table) = fragment_tables(&fragment);
        let sql = format!(
            "SELECT {start}, {end} FROM {table} WHERE filter_id = {p1}",
            start = db.kind().big_column("start_block"),
            end = db.kind().big_column("end_block"),
            table = interval_table,
            p1 = db.kind().placeholder(1),
        );
        let rows = db.query(&sql, &[DbValue::Text(fragment.id())]).await?;

        let mut intervals = Vec::with_capacity(rows.len());
        for row in &rows {
            intervals.push(Interval::new(
                encoder.row_u64(row, "start_block")?,
                encoder.row_u64(row, "end_block")?,
            ));
        }
        per_fragment.push(interval_union(&intervals));
    }

    Ok(interval_intersection_many(&per_fragment))
}

/// Truncate interval coverage so no range extends to or past `from_block`
/// on the given chain. Ranges fully above are deleted; straddling ranges
/// are clipped to end at `from_block - 1`.
pub async fn prune_intervals_by_chain(
    db: &Db,
    chain_id: u64,
    from_block: u64,
) -> Result<(), StoreError> {
    let encoder = db.encoder();
    let from = encoder.u64(from_block);

    for (filter_table, interval_table) in [
        ("log_filters", "log_filter_intervals"),
        ("factory_log_filters", "factory_log_filter_intervals"),
        ("block_filters", "block_filter_intervals"),
        ("trace_filters", "trace_filter_intervals"),
        ("factory_trace_filters", "factory_trace_filter_intervals"),
    ] {
        let delete_sql = format!(
            "DELETE FROM {interval_table} WHERE filter_id IN \
             (SELECT id FROM {filter_table} WHERE chain_id = {p1}) \
             AND start_block >= {p2}",
            p1 = db.kind().placeholder(1),
            p2 = db.kind().placeholder_for(2, &from),
        );
        db.execute(&delete_sql, &[DbValue::Int64(chain_id as i64), from.clone()])
            .await?;

        if from_block == 0 {
            continue;
        }
        let clip_sql = format!(
            "UPDATE {interval_table} SET end_block = {p1} WHERE filter_id IN \
             (SELECT id FROM {filter_table} WHERE chain_id = {p2}) \
             AND end_block >= {p3}",
            p1 = db.kind().placeholder_for(1, &encoder.u64(from_block - 1)),
            p2 = db.kind().placeholder(2),
            p3 = db.kind().placeholder_for(3, &from),
        );
        db.execute(
            &clip_sql,
            &[
                encoder.u64(from_block - 1),
                DbValue::Int64(chain_id as i64),
                from.clone(),
            ],
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::store::schema;
    use crate::types::filter::{AddressSpec, LogFilter, TopicSlot};
    use alloy::primitives::B256;

    async fn test_db() -> Db {
        let db = Db::in_memory().unwrap();
        schema::migrate(&db).await.unwrap();
        db
    }

    fn log_filter(topic0: TopicSlot) -> Filter {
        Filter::Log(
            LogFilter {
                chain_id: 1,
                from_block: 0,
                to_block: None,
                address: AddressSpec::Any,
                topics: [topic0, TopicSlot::Any, TopicSlot::Any, TopicSlot::Any],
                include_receipts: false,
            }
            .normalized(),
        )
    }

    #[tokio::test]
    async fn adjacent_inserts_merge_to_one_interval() {
        let db = test_db().await;
        let filter = log_filter(TopicSlot::Any);

        insert_interval(&db, &filter, Interval::new(0, 10)).await.unwrap();
        insert_interval(&db, &filter, Interval::new(20, 30)).await.unwrap();
        insert_interval(&db, &filter, Interval::new(10, 20)).await.unwrap();

        let intervals = get_intervals(&db, &filter).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(0, 30)]);
    }

    #[tokio::test]
    async fn insert_is_contained_in_coverage() {
        let db = test_db().await;
        let filter = log_filter(TopicSlot::Any);

        insert_interval(&db, &filter, Interval::new(100, 200)).await.unwrap();
        let intervals = get_intervals(&db, &filter).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(100, 200)]);

        // Idempotent re-insert.
        insert_interval(&db, &filter, Interval::new(100, 200)).await.unwrap();
        assert_eq!(
            get_intervals(&db, &filter).await.unwrap(),
            vec![Interval::new(100, 200)]
        );
    }

    #[tokio::test]
    async fn coverage_intersects_across_fragments() {
        let db = test_db().await;
        let topic_a = B256::repeat_byte(0xaa);
        let topic_b = B256::repeat_byte(0xbb);
        let combined = log_filter(TopicSlot::OneOf(vec![topic_a, topic_b]));

        // Cover the fragments unevenly through single-topic filters that
        // share fragment ids with the combined filter.
        insert_interval(&db, &log_filter(TopicSlot::One(topic_a)), Interval::new(0, 100))
            .await
            .unwrap();
        insert_interval(&db, &log_filter(TopicSlot::One(topic_b)), Interval::new(50, 200))
            .await
            .unwrap();

        let intervals = get_intervals(&db, &combined).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(50, 100)]);
    }

    #[tokio::test]
    async fn disjoint_coverage_is_preserved() {
        let db = test_db().await;
        let filter = log_filter(TopicSlot::Any);

        insert_interval(&db, &filter, Interval::new(0, 10)).await.unwrap();
        insert_interval(&db, &filter, Interval::new(50, 60)).await.unwrap();

        let intervals = get_intervals(&db, &filter).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(0, 10), Interval::new(50, 60)]);
    }

    #[tokio::test]
    async fn fragmentation_cap_is_fatal() {
        let db = test_db().await;
        let filter = log_filter(TopicSlot::Any);
        let fragment_id = filter.fragments()[0].id();
        let encoder = db.encoder();

        // Seed the fragment with disjoint non-adjacent singletons right at
        // the cap; they cannot merge with each other.
        insert_interval(&db, &filter, Interval::new(0, 0)).await.unwrap();
        for i in 1..MAX_FRAGMENT_INTERVALS as u64 {
            db.execute(
                "INSERT INTO log_filter_intervals (filter_id, start_block, end_block) \
                 VALUES (?1, ?2, ?3)",
                &[
                    DbValue::Text(fragment_id.clone()),
                    encoder.u64(i * 2),
                    encoder.u64(i * 2),
                ],
            )
            .await
            .unwrap();
        }

        let result = insert_interval(
            &db,
            &filter,
            Interval::new(MAX_FRAGMENT_INTERVALS as u64 * 2, MAX_FRAGMENT_INTERVALS as u64 * 2),
        )
        .await;
        assert!(matches!(
            result,
            Err(StoreError::FragmentationLimit { .. })
        ));
    }
}

