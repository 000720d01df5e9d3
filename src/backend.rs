use crate::error::DashError;
use crate::model::{ColumnDesc, Value};
use crate::params::ParameterSet;
use async_trait::async_trait;

/// What a statement handed back inside its transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Up to the requested number of rows, aligned with `columns`.
    Rows {
        columns: Vec<ColumnDesc>,
        rows: Vec<Vec<Value>>,
    },
    /// The statement ran but has no row set; `status` is its command tag.
    NoRowSet { status: String },
}

/// A connection owned by one request for its whole lifetime.
///
/// Statements of a request run one after another on the same backend, so
/// it is borrowed mutably by the executor and never shared.
#[async_trait]
pub trait Backend: Send {
    /// Tables the current role may SELECT from, ordered by name.
    async fn readable_tables(&mut self) -> Result<Vec<String>, DashError>;

    /// Open a transaction that cannot write. Dropping the returned handle
    /// without calling `rollback` must still roll it back.
    async fn begin_read_only<'a>(
        &'a mut self,
    ) -> Result<Box<dyn ReadOnlyTransaction + 'a>, DashError>;
}

/// A single-statement transaction. Has no commit operation.
#[async_trait]
pub trait ReadOnlyTransaction: Send {
    /// Run a trivial query so the read-only characteristic is fixed before
    /// user SQL gets a chance to change it.
    async fn probe(&mut self) -> Result<(), DashError>;

    /// Execute `sql` with `params` bound, returning at most `max_rows` rows.
    async fn fetch(
        &mut self,
        sql: &str,
        params: &ParameterSet,
        max_rows: usize,
    ) -> Result<Fetched, DashError>;

    async fn rollback(self: Box<Self>) -> Result<(), DashError>;
}
