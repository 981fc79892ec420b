use super::encoding::DbKind;
use super::types::{DbOperation, DbValue, WhereClause};

pub fn build_insert_sql(
    kind: DbKind,
    table: &str,
    columns: &[String],
    values: &[DbValue],
) -> (String, Vec<DbValue>) {
    let cols = columns.join(", ");
    let placeholders: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| kind.placeholder_for(i + 1, v))
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        cols,
        placeholders.join(", ")
    );
    (sql, values.to_vec())
}

pub fn build_upsert_sql(
    kind: DbKind,
    table: &str,
    columns: &[String],
    values: &[DbValue],
    conflict_columns: &[String],
    update_columns: &[String],
) -> (String, Vec<DbValue>) {
    let cols = columns.join(", ");
    let placeholders: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| kind.placeholder_for(i + 1, v))
        .collect();

    let conflict_cols = conflict_columns.join(", ");
    let sql = if update_columns.is_empty() {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            table,
            cols,
            placeholders.join(", "),
            conflict_cols
        )
    } else {
        let updates: Vec<String> = update_columns
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            table,
            cols,
            placeholders.join(", "),
            conflict_cols,
            updates.join(", ")
        )
    };

    (sql, values.to_vec())
}

pub fn build_delete_sql(
    kind: DbKind,
    table: &str,
    where_clause: &WhereClause,
) -> (String, Vec<DbValue>) {
    let (condition, params) = render_where(kind, where_clause, 1);
    let sql = format!("DELETE FROM {} WHERE {}", table, condition);
    (sql, params)
}

fn render_where(
    kind: DbKind,
    where_clause: &WhereClause,
    first_index: usize,
) -> (String, Vec<DbValue>) {
    match where_clause {
        WhereClause::Eq(col, value) => (
            format!("{} = {}", col, kind.placeholder_for(first_index, value)),
            vec![value.clone()],
        ),
        WhereClause::And(conditions) => {
            let mut params = Vec::with_capacity(conditions.len());
            let parts: Vec<String> = conditions
                .iter()
                .enumerate()
                .map(|(i, (col, value))| {
                    params.push(value.clone());
                    format!("{} = {}", col, kind.placeholder_for(first_index + i, value))
                })
                .collect();
            (parts.join(" AND "), params)
        }
        WhereClause::Raw { condition, params } => (condition.clone(), params.clone()),
    }
}

/// Lower an operation to `(sql, params)` for the given dialect.
pub fn operation_sql(kind: DbKind, op: &DbOperation) -> (String, Vec<DbValue>) {
    match op {
        DbOperation::Insert {
            table,
            columns,
            values,
        } => build_insert_sql(kind, table, columns, values),
        DbOperation::Upsert {
            table,
            columns,
            values,
            conflict_columns,
            update_columns,
        } => build_upsert_sql(kind, table, columns, values, conflict_columns, update_columns),
        DbOperation::Delete {
            table,
            where_clause,
        } => build_delete_sql(kind, table, where_clause),
        DbOperation::RawSql { query, params } => (query.clone(), params.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_placeholders_per_dialect() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let values = vec![DbValue::Int64(1), DbValue::Text("x".into())];

        let (pg, _) = build_insert_sql(DbKind::Postgres, "t", &columns, &values);
        assert_eq!(pg, "INSERT INTO t (a, b) VALUES ($1, $2)");

        let (lite, _) = build_insert_sql(DbKind::Sqlite, "t", &columns, &values);
        assert_eq!(lite, "INSERT INTO t (a, b) VALUES (?1, ?2)");
    }

    #[test]
    fn numeric_binds_are_cast_on_postgres() {
        let columns = vec!["n".to_string()];
        let values = vec![DbValue::Numeric("12".into())];
        let (sql, _) = build_insert_sql(DbKind::Postgres, "t", &columns, &values);
        assert_eq!(sql, "INSERT INTO t (n) VALUES ($1::numeric)");
    }

    #[test]
    fn upsert_without_updates_is_do_nothing() {
        let columns = vec!["id".to_string()];
        let values = vec![DbValue::Text("k".into())];
        let (sql, _) = build_upsert_sql(
            DbKind::Sqlite,
            "t",
            &columns,
            &values,
            &["id".to_string()],
            &[],
        );
        assert!(sql.ends_with("ON CONFLICT (id) DO NOTHING"));
    }
}
