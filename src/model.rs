use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Rows shown per statement. One extra row is fetched to detect truncation.
pub const DISPLAY_LIMIT: usize = 100;

/// Column name of the pseudo-row used for statements without a row set.
pub const STATUS_COLUMN: &str = "statusmessage";

/// A decoded cell, before display formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// `real`, kept at single precision so it prints the way the server does.
    Real(f32),
    Float(f64),
    /// NUMERIC keeps its exact decimal text.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Time of day with its UTC offset in seconds east.
    TimeTz { time: NaiveTime, offset_secs: i32 },
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Interval),
    Array(Vec<Value>),
    /// Payload could not be decoded; carries the PostgreSQL type name.
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

/// Coarse classification of a result column, enough to pick a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Numeric,
    Text,
    Binary,
    Uuid,
    Json,
    Date,
    Time,
    Timestamp,
    Interval,
    Array,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDesc {
    pub name: String,
    pub type_name: String,
    pub type_oid: u32,
    pub kind: ColumnKind,
}

impl ColumnDesc {
    /// Description of the single `statusmessage` column of a pseudo-row.
    pub fn status() -> Self {
        Self {
            name: STATUS_COLUMN.to_string(),
            type_name: "text".to_string(),
            type_oid: 25,
            kind: ColumnKind::Text,
        }
    }
}

/// Display-formatted cells aligned with the column descriptions. `None` is NULL.
pub type DisplayRow = Vec<Option<String>>;

/// How a single statement ended. Exactly one variant per statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows {
        columns: Vec<ColumnDesc>,
        rows: Vec<DisplayRow>,
        truncated: bool,
        duration_ms: f64,
    },
    /// The statement produced a command tag instead of a row set.
    Status { message: String, duration_ms: f64 },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub sql: String,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

impl QueryResult {
    pub fn error(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            outcome: QueryOutcome::Error {
                message: message.into(),
            },
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Error { .. })
    }

    pub fn duration_ms(&self) -> Option<f64> {
        match &self.outcome {
            QueryOutcome::Rows { duration_ms, .. } | QueryOutcome::Status { duration_ms, .. } => {
                Some(*duration_ms)
            }
            QueryOutcome::Error { .. } => None,
        }
    }

    pub fn truncated(&self) -> bool {
        matches!(
            self.outcome,
            QueryOutcome::Rows {
                truncated: true,
                ..
            }
        )
    }

    /// Column descriptions as displayed; a status outcome has the single
    /// `statusmessage` column, an error has none.
    pub fn columns(&self) -> Cow<'_, [ColumnDesc]> {
        match &self.outcome {
            QueryOutcome::Rows { columns, .. } => Cow::Borrowed(columns),
            QueryOutcome::Status { .. } => Cow::Owned(vec![ColumnDesc::status()]),
            QueryOutcome::Error { .. } => Cow::Owned(Vec::new()),
        }
    }

    /// Rows as displayed, including the pseudo-row of a status outcome.
    pub fn rows(&self) -> Cow<'_, [DisplayRow]> {
        match &self.outcome {
            QueryOutcome::Rows { rows, .. } => Cow::Borrowed(rows),
            QueryOutcome::Status { message, .. } => Cow::Owned(vec![vec![Some(message.clone())]]),
            QueryOutcome::Error { .. } => Cow::Owned(Vec::new()),
        }
    }

    /// Look up one displayed cell by row index and column name. The outer
    /// `None` means no such row or column, the inner one a NULL cell.
    pub fn cell(&self, row: usize, column: &str) -> Option<Option<String>> {
        let idx = self.columns().iter().position(|c| c.name == column)?;
        self.rows().get(row).and_then(|r| r.get(idx).cloned())
    }
}

/// A stored dashboard as handed over by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedDashboard {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Queries in their stored order.
    pub queries: Vec<String>,
}
