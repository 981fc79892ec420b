use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use super::error::DbError;
use super::types::{DbRow, DbValue};

pub fn build_pool(connection_string: &str) -> Result<Pool, DbError> {
    let config = connection_string
        .parse::<tokio_postgres::Config>()
        .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let manager = Manager::from_config(config, NoTls, manager_config);

    let pool = Pool::builder(manager)
        .max_size(16)
        .runtime(Runtime::Tokio1)
        .build()?;

    Ok(pool)
}

/// Wire form of a bind parameter. NUMERIC and JSON values travel as text;
/// the generated SQL carries the cast.
#[derive(Debug)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int64(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ToSql for SqlParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlParam::Null => Ok(IsNull::Yes),
            SqlParam::Bool(v) => v.to_sql(ty, out),
            SqlParam::Int64(v) => v.to_sql(ty, out),
            SqlParam::Text(v) => v.to_sql(ty, out),
            SqlParam::Bytes(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <Vec<u8> as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

pub fn convert_params(values: &[DbValue]) -> Vec<SqlParam> {
    values
        .iter()
        .map(|value| match value {
            DbValue::Null => SqlParam::Null,
            DbValue::Bool(v) => SqlParam::Bool(*v),
            DbValue::Int64(v) => SqlParam::Int64(*v),
            DbValue::Text(v) => SqlParam::Text(v.clone()),
            DbValue::Bytes(v) => SqlParam::Bytes(v.clone()),
            DbValue::Numeric(v) => SqlParam::Text(v.clone()),
            DbValue::Json(v) => SqlParam::Text(v.to_string()),
        })
        .collect()
}

/// Decode a result row into backend-neutral values by column type.
/// Big-integer columns are expected to be cast to text in the select list.
pub fn convert_row(row: &tokio_postgres::Row) -> Result<DbRow, DbError> {
    let mut columns = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.map(DbValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?.map(|v| DbValue::Int64(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?.map(|v| DbValue::Int64(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(DbValue::Int64)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
            row.try_get::<_, Option<String>>(i)?.map(DbValue::Text)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(DbValue::Bytes)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(i)?.map(DbValue::Json)
        } else {
            return Err(DbError::Decode(format!(
                "unsupported column type '{}' for column '{}' (cast to text in the query)",
                ty,
                column.name()
            )));
        };

        columns.push((column.name().to_string(), value.unwrap_or(DbValue::Null)));
    }

    Ok(DbRow::new(columns))
}
