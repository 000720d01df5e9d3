//! PostgreSQL backend on top of tokio-postgres.

use crate::backend::{Backend, Fetched, ReadOnlyTransaction};
use crate::config::Config;
use crate::error::DashError;
use crate::format::command_tag;
use crate::model::{ColumnDesc, ColumnKind, Interval, Value};
use chrono::NaiveTime;
use crate::params::{to_positional, ParameterSet};
use async_trait::async_trait;
use bytes::BytesMut;
use postgres_types::{Format, IsNull, Kind};
use std::error::Error;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Column, NoTls, Row as PgRow, Transaction};
use tracing::{debug, error, info};

/// Tables the current role holds SELECT on.
pub const AVAILABLE_TABLES_SQL: &str = "SELECT table_name::text \
     FROM information_schema.table_privileges \
     WHERE grantee = current_user AND privilege_type = 'SELECT' \
     ORDER BY table_name";

const PROBE_SQL: &str = "SELECT 1";

/// Open a connection described by `config` and drive it on the current runtime.
pub async fn connect(config: &Config) -> Result<PgBackend, DashError> {
    let pg_config = config.pg_config()?;
    info!(
        application_name = %config.application_name,
        statement_timeout = ?config.statement_timeout,
        "connecting to PostgreSQL"
    );

    let (client, connection) = pg_config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection error");
        }
    });

    info!("PostgreSQL connection established");
    Ok(PgBackend::new(client))
}

/// One connection, owned by one request at a time.
pub struct PgBackend {
    client: Client,
}

impl PgBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn readable_tables(&mut self) -> Result<Vec<String>, DashError> {
        let rows = self.client.query(AVAILABLE_TABLES_SQL, &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(DashError::from))
            .collect()
    }

    async fn begin_read_only<'a>(
        &'a mut self,
    ) -> Result<Box<dyn ReadOnlyTransaction + 'a>, DashError> {
        let tx = self
            .client
            .build_transaction()
            .read_only(true)
            .start()
            .await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Dropping the inner transaction without commit makes tokio-postgres
/// issue a ROLLBACK, so every exit path ends the same way.
struct PgTransaction<'a> {
    tx: Transaction<'a>,
}

#[async_trait]
impl ReadOnlyTransaction for PgTransaction<'_> {
    async fn probe(&mut self) -> Result<(), DashError> {
        self.tx.query_one(PROBE_SQL, &[]).await?;
        Ok(())
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &ParameterSet,
        max_rows: usize,
    ) -> Result<Fetched, DashError> {
        let positional = to_positional(sql);
        let values = params.values_for(&positional.names)?;
        let text_params: Vec<TextParam<'_>> = values.into_iter().map(TextParam).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = text_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let statement = self.tx.prepare(&positional.sql).await?;

        if statement.columns().is_empty() {
            let affected = self.tx.execute(&statement, &param_refs).await?;
            return Ok(Fetched::NoRowSet {
                status: command_tag(sql, affected),
            });
        }

        let columns: Vec<ColumnDesc> = statement.columns().iter().map(describe_column).collect();
        let portal = self.tx.bind(&statement, &param_refs).await?;
        let limit = i32::try_from(max_rows).unwrap_or(i32::MAX);
        let pg_rows = self.tx.query_portal(&portal, limit).await?;
        debug!(rows = pg_rows.len(), limit, "fetched from portal");

        let rows = pg_rows.iter().map(decode_row).collect();
        Ok(Fetched::Rows { columns, rows })
    }

    async fn rollback(self: Box<Self>) -> Result<(), DashError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

/// A parameter sent in text format, so the server parses it for whatever
/// type it inferred for the placeholder. The value never becomes SQL text.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    postgres_types::to_sql_checked!();
}

fn describe_column(col: &Column) -> ColumnDesc {
    let ty = col.type_();
    ColumnDesc {
        name: col.name().to_string(),
        type_name: ty.name().to_string(),
        type_oid: ty.oid(),
        kind: column_kind(ty),
    }
}

fn column_kind(ty: &Type) -> ColumnKind {
    match *ty {
        Type::BOOL => ColumnKind::Boolean,
        Type::INT2 | Type::INT4 | Type::INT8 => ColumnKind::Integer,
        _ if is_oid_alias(ty) => ColumnKind::Integer,
        Type::FLOAT4 | Type::FLOAT8 => ColumnKind::Float,
        Type::NUMERIC => ColumnKind::Numeric,
        Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME
        | Type::CHAR
        | Type::XML
        | Type::INET => ColumnKind::Text,
        Type::BYTEA => ColumnKind::Binary,
        Type::UUID => ColumnKind::Uuid,
        Type::JSON | Type::JSONB => ColumnKind::Json,
        Type::DATE => ColumnKind::Date,
        Type::TIME | Type::TIMETZ => ColumnKind::Time,
        Type::TIMESTAMP | Type::TIMESTAMPTZ => ColumnKind::Timestamp,
        Type::INTERVAL => ColumnKind::Interval,
        _ => match ty.kind() {
            Kind::Array(_) => ColumnKind::Array,
            Kind::Enum(_) => ColumnKind::Text,
            Kind::Domain(base) => column_kind(base),
            _ => ColumnKind::Other,
        },
    }
}

/// `oid` and the `reg*` aliases share the same four-byte payload.
fn is_oid_alias(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::OID
            | Type::REGCLASS
            | Type::REGTYPE
            | Type::REGPROC
            | Type::REGPROCEDURE
            | Type::REGOPER
            | Type::REGOPERATOR
            | Type::REGCONFIG
            | Type::REGDICTIONARY
            | Type::REGNAMESPACE
            | Type::REGROLE
    )
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

fn decode_cell(row: &PgRow, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();
    match row.try_get::<_, Option<RawCell<'_>>>(idx) {
        Ok(Some(raw)) => decode_value(ty, raw.0),
        Ok(None) => Value::Null,
        Err(_) => Value::Unsupported(ty.name().to_string()),
    }
}

/// Decode one non-NULL binary payload of type `ty`.
fn decode_value(ty: &Type, raw: &[u8]) -> Value {
    let decoded = match *ty {
        Type::BOOL => parse(ty, raw, Value::Bool),
        Type::INT2 => parse(ty, raw, |v: i16| Value::Int(v.into())),
        Type::INT4 => parse(ty, raw, |v: i32| Value::Int(v.into())),
        Type::INT8 => parse(ty, raw, Value::Int),
        _ if is_oid_alias(ty) => <[u8; 4]>::try_from(raw)
            .ok()
            .map(|b| Value::Int(u32::from_be_bytes(b).into())),
        Type::CHAR => parse(ty, raw, |v: i8| Value::Text(char::from(v as u8).to_string())),
        Type::FLOAT4 => parse(ty, raw, Value::Real),
        Type::FLOAT8 => parse(ty, raw, Value::Float),
        Type::NUMERIC => parse(ty, raw, |v: PgNumeric| Value::Numeric(v.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => parse(ty, raw, Value::Text),
        Type::BYTEA => parse(ty, raw, Value::Bytes),
        Type::UUID => parse(ty, raw, Value::Uuid),
        Type::JSON | Type::JSONB => parse(ty, raw, Value::Json),
        Type::DATE => parse(ty, raw, Value::Date),
        Type::TIME => parse(ty, raw, Value::Time),
        Type::TIMETZ => decode_time_tz(raw),
        Type::TIMESTAMP => parse(ty, raw, Value::Timestamp),
        Type::TIMESTAMPTZ => parse(ty, raw, Value::TimestampTz),
        Type::INTERVAL => parse(ty, raw, |v: PgInterval| Value::Interval(v.0)),
        Type::INET => parse(ty, raw, |v: std::net::IpAddr| Value::Text(v.to_string())),
        _ => match ty.kind() {
            Kind::Array(elem) => decode_array(elem, raw).ok(),
            Kind::Domain(base) => Some(decode_value(base, raw)),
            _ if is_textual(ty) => parse(ty, raw, Value::Text),
            _ => None,
        },
    };
    decoded.unwrap_or_else(|| Value::Unsupported(ty.name().to_string()))
}

fn parse<'a, T, F>(ty: &Type, raw: &'a [u8], wrap: F) -> Option<Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    T::from_sql(ty, raw).ok().map(wrap)
}

/// Types whose binary representation is their text form.
fn is_textual(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_)) || *ty == Type::XML || ty.name() == "citext"
}

/// TIMETZ: microseconds since midnight, then the zone in seconds west of UTC.
fn decode_time_tz(raw: &[u8]) -> Option<Value> {
    let micros = i64::from_be_bytes(raw.get(0..8)?.try_into().ok()?);
    let zone = i32::from_be_bytes(raw.get(8..12)?.try_into().ok()?);
    let secs = u32::try_from(micros / 1_000_000).ok()?;
    let nanos = u32::try_from((micros % 1_000_000) * 1_000).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)?;
    Some(Value::TimeTz {
        time,
        offset_secs: -zone,
    })
}

type DecodeError = Box<dyn Error + Sync + Send>;

fn read_i32(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    if buf.len() < 4 {
        return Err("invalid array payload: truncated".into());
    }
    let (head, rest) = buf.split_at(4);
    *buf = rest;
    Ok(i32::from_be_bytes(head.try_into()?))
}

/// Binary array payload of any element type and dimension count. Nested
/// dimensions become nested arrays.
fn decode_array(elem: &Type, raw: &[u8]) -> Result<Value, DecodeError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_nulls = read_i32(&mut buf)?;
    let _elem_oid = read_i32(&mut buf)?;

    let mut dims = Vec::with_capacity(usize::try_from(ndim)?);
    for _ in 0..ndim {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len)?);
    }
    if dims.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let total: usize = dims.iter().product();
    let mut items = Vec::with_capacity(total);
    for _ in 0..total {
        let len = read_i32(&mut buf)?;
        if len < 0 {
            items.push(Value::Null);
            continue;
        }
        let len = len as usize;
        if buf.len() < len {
            return Err("invalid array payload: truncated element".into());
        }
        let (item, rest) = buf.split_at(len);
        items.push(decode_value(elem, item));
        buf = rest;
    }
    Ok(nest(items, &dims))
}

fn nest(items: Vec<Value>, dims: &[usize]) -> Value {
    let inner: usize = dims.iter().skip(1).product();
    if dims.len() <= 1 || inner == 0 {
        return Value::Array(items);
    }
    Value::Array(
        items
            .chunks(inner)
            .map(|chunk| nest(chunk.to_vec(), &dims[1..]))
            .collect(),
    )
}

/// The undecoded payload of any column type.
struct RawCell<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

struct PgInterval(Interval);

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.len() != 16 {
            return Err("invalid INTERVAL payload".into());
        }
        let micros = i64::from_be_bytes(raw[0..8].try_into()?);
        let days = i32::from_be_bytes(raw[8..12].try_into()?);
        let months = i32::from_be_bytes(raw[12..16].try_into()?);
        Ok(Self(Interval {
            months,
            days,
            micros,
        }))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// NUMERIC rendered exactly, with as many fraction digits as its scale.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(numeric_to_string(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn numeric_to_string(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("invalid NUMERIC payload: too short".into());
    }
    let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("invalid NUMERIC payload: truncated digits".into());
    }

    let digits: Vec<u16> = raw[8..8 + ndigits * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    // Base-10000 digit at index `i`; index 0 carries weight `weight`.
    let group = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && !digits.iter().all(|d| *d == 0) {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&group(i).to_string());
            } else {
                out.push_str(&format!("{:04}", group(i)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}
