//! In-memory backend that answers from a script and records every call.

use crate::backend::{Backend, Fetched, ReadOnlyTransaction};
use crate::error::DashError;
use crate::model::{ColumnDesc, ColumnKind, Value};
use crate::params::{extract_named_parameters, ParameterSet};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    responses: HashMap<String, Result<Fetched, String>>,
    tables: Vec<String>,
    begin_error: Option<String>,
    probe_error: Option<String>,
    rollback_error: Option<String>,
    log: Vec<String>,
    bound: Vec<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_tables(mut self, tables: &[&str]) -> Self {
        self.tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub(crate) fn with_int_rows(mut self, sql: &str, count: i64) -> Self {
        let columns = vec![ColumnDesc {
            name: "n".into(),
            type_name: "int4".into(),
            type_oid: 23,
            kind: ColumnKind::Integer,
        }];
        let rows = (0..count).map(|i| vec![Value::Int(i)]).collect();
        self.responses
            .insert(sql.to_string(), Ok(Fetched::Rows { columns, rows }));
        self
    }

    pub(crate) fn with_status(mut self, sql: &str, status: &str) -> Self {
        self.responses.insert(
            sql.to_string(),
            Ok(Fetched::NoRowSet {
                status: status.to_string(),
            }),
        );
        self
    }

    pub(crate) fn with_error(mut self, sql: &str, message: &str) -> Self {
        self.responses
            .insert(sql.to_string(), Err(message.to_string()));
        self
    }

    pub(crate) fn failing_begin(mut self, message: &str) -> Self {
        self.begin_error = Some(message.to_string());
        self
    }

    pub(crate) fn failing_probe(mut self, message: &str) -> Self {
        self.probe_error = Some(message.to_string());
        self
    }

    pub(crate) fn failing_rollback(mut self, message: &str) -> Self {
        self.rollback_error = Some(message.to_string());
        self
    }

    pub(crate) fn log(&self) -> &[String] {
        &self.log
    }

    /// Parameter bindings seen by each `fetch`, in call order.
    pub(crate) fn bound(&self) -> &[Vec<(String, String)>] {
        &self.bound
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn readable_tables(&mut self) -> Result<Vec<String>, DashError> {
        Ok(self.tables.clone())
    }

    async fn begin_read_only<'a>(
        &'a mut self,
    ) -> Result<Box<dyn ReadOnlyTransaction + 'a>, DashError> {
        self.log.push("BEGIN READ ONLY".into());
        if let Some(message) = &self.begin_error {
            return Err(DashError::Invalid(message.clone()));
        }
        Ok(Box::new(ScriptedTx {
            backend: self,
            finished: false,
        }))
    }
}

struct ScriptedTx<'a> {
    backend: &'a mut ScriptedBackend,
    finished: bool,
}

#[async_trait]
impl ReadOnlyTransaction for ScriptedTx<'_> {
    async fn probe(&mut self) -> Result<(), DashError> {
        self.backend.log.push("SELECT 1".into());
        match &self.backend.probe_error {
            Some(message) => Err(DashError::Invalid(message.clone())),
            None => Ok(()),
        }
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &ParameterSet,
        max_rows: usize,
    ) -> Result<Fetched, DashError> {
        self.backend.log.push(format!("FETCH {sql} LIMIT {max_rows}"));

        let mut binding = Vec::new();
        for name in extract_named_parameters(sql) {
            let value = params
                .get(&name)
                .ok_or_else(|| DashError::MissingParameter(name.clone()))?;
            binding.push((name, value.to_string()));
        }
        self.backend.bound.push(binding);

        match self.backend.responses.get(sql).cloned() {
            Some(Ok(Fetched::Rows { columns, mut rows })) => {
                rows.truncate(max_rows);
                Ok(Fetched::Rows { columns, rows })
            }
            Some(Ok(other)) => Ok(other),
            Some(Err(message)) => Err(DashError::Invalid(message)),
            None => Err(DashError::Invalid(format!("no scripted answer for {sql}"))),
        }
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DashError> {
        self.finished = true;
        self.backend.log.push("ROLLBACK".into());
        match &self.backend.rollback_error {
            Some(message) => Err(DashError::Invalid(message.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for ScriptedTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.backend.log.push("ROLLBACK (dropped)".into());
        }
    }
}
