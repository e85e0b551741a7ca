//! Conversions between [`Value`] and sqlx's Postgres types

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgColumn, PgConnection, PgRow, PgTypeInfo, PgTypeKind,
    PgValueFormat,
};
use sqlx::query::Query;
use sqlx::{Column, Encode, Postgres, Row as _, Type, TypeInfo, ValueRef};
use uuid::Uuid;

use super::wire::{inet_text, interval_text, macaddr_text, numeric_text};
use crate::copy::{Identifier, copy_statement, encode_rows};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// NULL sent with an unspecified parameter type, which Postgres resolves from where
/// the parameter appears in the statement
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(
        &self,
        _buf: &mut PgArgumentBuffer,
    ) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

pub(crate) fn bind_values<'q>(sql: &'q str, args: &'q [Value]) -> Result<PgQuery<'q>> {
    let query = args
        .iter()
        .enumerate()
        .try_fold(sqlx::query(sql), |q, (i, arg)| bind_value(q, i + 1, arg))?;
    // sqlx caches prepared statements by SQL text, and an untyped NULL takes whatever
    // type the server infers at prepare time. Keep those statements out of the cache
    // so a later call binding a real value prepares with its own types.
    Ok(query.persistent(!args.iter().any(Value::is_null)))
}

fn bind_value<'q>(q: PgQuery<'q>, position: usize, arg: &'q Value) -> Result<PgQuery<'q>> {
    let q = match arg {
        Value::Null => q.bind(UntypedNull),
        Value::Bool(b) => q.bind(*b),
        Value::Int(i) => q.bind(*i),
        Value::Float(f) => q.bind(*f),
        Value::Text(s) => q.bind(s.as_str()),
        Value::Bytes(b) => q.bind(b.as_slice()),
        Value::Uuid(u) => q.bind(*u),
        Value::Timestamp(t) => q.bind(*t),
        Value::Date(d) => q.bind(*d),
        Value::Time(t) => q.bind(*t),
        Value::Json(j) => q.bind(sqlx::types::Json(j)),
        Value::Array(items) => bind_array(q, position, items)?,
    };
    Ok(q)
}

fn elements<T>(
    items: &[Value],
    position: usize,
    pick: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>> {
    items
        .iter()
        .map(|item| match item {
            Value::Null => Ok(None),
            other => pick(other).map(Some).ok_or_else(|| {
                Error::encode(
                    position,
                    format!("array element of type {} differs from the first", other.type_name()),
                )
            }),
        })
        .collect()
}

macro_rules! bind_elements {
    ($q:expr, $items:expr, $position:expr, $variant:ident) => {
        $q.bind(elements($items, $position, |v| match v {
            Value::$variant(x) => Some(x.clone()),
            _ => None,
        })?)
    };
}

/// Typed by the first non-NULL element; empty and all-NULL arrays go out as `text[]`
fn bind_array<'q>(q: PgQuery<'q>, position: usize, items: &[Value]) -> Result<PgQuery<'q>> {
    let q = match items.iter().find(|v| !v.is_null()) {
        None | Some(Value::Text(_)) => bind_elements!(q, items, position, Text),
        Some(Value::Bool(_)) => bind_elements!(q, items, position, Bool),
        Some(Value::Int(_)) => bind_elements!(q, items, position, Int),
        Some(Value::Float(_)) => bind_elements!(q, items, position, Float),
        Some(Value::Bytes(_)) => bind_elements!(q, items, position, Bytes),
        Some(Value::Uuid(_)) => bind_elements!(q, items, position, Uuid),
        Some(Value::Timestamp(_)) => bind_elements!(q, items, position, Timestamp),
        Some(Value::Date(_)) => bind_elements!(q, items, position, Date),
        Some(Value::Time(_)) => bind_elements!(q, items, position, Time),
        Some(other) => {
            return Err(Error::encode(
                position,
                format!("arrays of {} are not supported", other.type_name()),
            ));
        }
    };
    Ok(q)
}

pub(crate) fn decode_rows(rows: &[PgRow]) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns = column_names(first);
    rows.iter().map(|row| decode_row(row, columns.clone())).collect()
}

pub(crate) fn decode_one(row: &PgRow) -> Result<Row> {
    decode_row(row, column_names(row))
}

fn column_names(row: &PgRow) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn decode_row(row: &PgRow, columns: Arc<[String]>) -> Result<Row> {
    let values = row
        .columns()
        .iter()
        .map(|col| decode_value(row, col))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

fn array<T: Into<Value>>(items: Option<Vec<Option<T>>>) -> Value {
    items.map_or(Value::Null, |items| {
        Value::Array(items.into_iter().map(Value::from).collect())
    })
}

fn decode_value(row: &PgRow, col: &PgColumn) -> Result<Value> {
    let i = col.ordinal();
    let value = match col.type_info().name() {
        "BOOL" => Value::from(row.try_get::<Option<bool>, _>(i)?),
        "INT2" => Value::from(row.try_get::<Option<i16>, _>(i)?),
        "INT4" => Value::from(row.try_get::<Option<i32>, _>(i)?),
        "INT8" => Value::from(row.try_get::<Option<i64>, _>(i)?),
        "OID" => Value::from(row.try_get::<Option<Oid>, _>(i)?.map(|oid| oid.0)),
        "FLOAT4" => Value::from(row.try_get::<Option<f32>, _>(i)?),
        "FLOAT8" => Value::from(row.try_get::<Option<f64>, _>(i)?),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" => Value::from(row.try_get::<Option<String>, _>(i)?),
        "BYTEA" => Value::from(row.try_get::<Option<Vec<u8>>, _>(i)?),
        "UUID" => Value::from(row.try_get::<Option<Uuid>, _>(i)?),
        "TIMESTAMPTZ" => Value::from(row.try_get::<Option<DateTime<Utc>>, _>(i)?),
        "TIMESTAMP" => Value::from(row.try_get::<Option<NaiveDateTime>, _>(i)?),
        "DATE" => Value::from(row.try_get::<Option<NaiveDate>, _>(i)?),
        "TIME" => Value::from(row.try_get::<Option<NaiveTime>, _>(i)?),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(i)?
            .map_or(Value::Null, |iv| {
                Value::Text(interval_text(iv.months, iv.days, iv.microseconds))
            }),
        "JSON" | "JSONB" => Value::from(row.try_get::<Option<serde_json::Value>, _>(i)?),
        "BOOL[]" => array(row.try_get::<Option<Vec<Option<bool>>>, _>(i)?),
        "INT2[]" => array(row.try_get::<Option<Vec<Option<i16>>>, _>(i)?),
        "INT4[]" => array(row.try_get::<Option<Vec<Option<i32>>>, _>(i)?),
        "INT8[]" => array(row.try_get::<Option<Vec<Option<i64>>>, _>(i)?),
        "FLOAT4[]" => array(row.try_get::<Option<Vec<Option<f32>>>, _>(i)?),
        "FLOAT8[]" => array(row.try_get::<Option<Vec<Option<f64>>>, _>(i)?),
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => {
            array(row.try_get::<Option<Vec<Option<String>>>, _>(i)?)
        }
        "BYTEA[]" => array(row.try_get::<Option<Vec<Option<Vec<u8>>>>, _>(i)?),
        "UUID[]" => array(row.try_get::<Option<Vec<Option<Uuid>>>, _>(i)?),
        "TIMESTAMPTZ[]" => array(row.try_get::<Option<Vec<Option<DateTime<Utc>>>>, _>(i)?),
        "TIMESTAMP[]" => array(row.try_get::<Option<Vec<Option<NaiveDateTime>>>, _>(i)?),
        "DATE[]" => array(row.try_get::<Option<Vec<Option<NaiveDate>>>, _>(i)?),
        "TIME[]" => array(row.try_get::<Option<Vec<Option<NaiveTime>>>, _>(i)?),
        "JSON[]" | "JSONB[]" => {
            array(row.try_get::<Option<Vec<Option<serde_json::Value>>>, _>(i)?)
        }
        "VOID" => Value::Null,
        _ => decode_raw(row, col)?,
    };
    Ok(value)
}

/// Columns without a typed decoder above, read from the wire value. Text-like types
/// (enums, `citext`, `"char"`) come back as text; NUMERIC, INET, CIDR and MACADDR are
/// rendered the way Postgres prints them; anything else is returned as its raw
/// binary encoding.
fn decode_raw(row: &PgRow, col: &PgColumn) -> Result<Value> {
    let raw = row.try_get_raw(col.ordinal())?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let decode_err = |message: String| Error::decode(col.name(), message);
    let type_info = col.type_info();
    let name = type_info.name();

    let text_like = matches!(raw.format(), PgValueFormat::Text)
        || matches!(type_info.kind(), PgTypeKind::Enum(_))
        || name.eq_ignore_ascii_case("citext")
        || name == "\"CHAR\"";
    if text_like {
        let text = raw.as_str().map_err(|e| decode_err(e.to_string()))?;
        return Ok(Value::Text(text.to_string()));
    }

    let bytes = raw.as_bytes().map_err(|e| decode_err(e.to_string()))?;
    let text = match name {
        "NUMERIC" => numeric_text(bytes),
        "INET" | "CIDR" => inet_text(bytes),
        "MACADDR" | "MACADDR8" => Ok(macaddr_text(bytes)),
        other => {
            log::debug!(
                "no decoder for column {} of type {}, returning raw bytes",
                col.name(),
                other
            );
            return Ok(Value::Bytes(bytes.to_vec()));
        }
    };
    text.map(Value::Text).map_err(decode_err)
}

/// Stream `rows` through `COPY ... FROM STDIN` on `conn`
pub(crate) async fn copy_rows(
    conn: &mut PgConnection,
    table: &Identifier,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<u64> {
    let statement = copy_statement(table, columns);
    let mut copy = conn.copy_in_raw(&statement).await?;

    let sent = copy.send(encode_rows(rows)).await.map(|_| ());
    match sent {
        Ok(()) => Ok(copy.finish().await?),
        Err(e) => {
            if let Err(abort) = copy.abort(e.to_string()).await {
                log::warn!("failed to abort COPY into {}: {}", table.sanitize(), abort);
            }
            Err(e.into())
        }
    }
}
