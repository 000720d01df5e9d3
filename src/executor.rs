use crate::backend::{Backend, Fetched, ReadOnlyTransaction};
use crate::error::DashError;
use crate::format::displayable_rows;
use crate::guard;
use crate::model::{QueryOutcome, QueryResult, DISPLAY_LIMIT};
use crate::params::ParameterSet;
use std::time::Instant;
use tracing::{debug, warn};

fn preview(sql: &str) -> String {
    sql.chars().take(100).collect()
}

/// Run every query in order on one backend. The output has exactly one
/// result per input, at the same position, whatever happens to each.
pub async fn run_queries<B, S>(backend: &mut B, queries: &[S], params: &ParameterSet) -> Vec<QueryResult>
where
    B: Backend + ?Sized,
    S: AsRef<str>,
{
    let mut results = Vec::with_capacity(queries.len());
    for sql in queries {
        results.push(run_statement(backend, sql.as_ref(), params).await);
    }
    results
}

/// Guard, then execute, a single statement in its own read-only
/// transaction. Failures become an error result, never an `Err`.
pub async fn run_statement<B>(backend: &mut B, raw_sql: &str, params: &ParameterSet) -> QueryResult
where
    B: Backend + ?Sized,
{
    let sql = raw_sql.trim();

    if let Err(message) = guard::check_statement(sql) {
        warn!(sql_preview = %preview(sql), "rejected multi-statement query");
        return QueryResult::error(sql, message);
    }

    debug!(sql_preview = %preview(sql), "executing statement");
    match execute_isolated(backend, sql, params).await {
        Ok(outcome) => QueryResult {
            sql: sql.to_string(),
            outcome,
        },
        Err(err) => {
            debug!(error = %err, "statement failed");
            QueryResult::error(sql, err.to_string())
        }
    }
}

async fn execute_isolated<B>(
    backend: &mut B,
    sql: &str,
    params: &ParameterSet,
) -> Result<QueryOutcome, DashError>
where
    B: Backend + ?Sized,
{
    let mut tx = backend.begin_read_only().await?;
    let attempt = run_in_transaction(tx.as_mut(), sql, params).await;
    let rollback = tx.rollback().await;

    match (attempt, rollback) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(rollback_err)) => {
            warn!(error = %rollback_err, "rollback after failed statement also failed");
            Err(err)
        }
        (Ok(_), Err(rollback_err)) => {
            warn!(error = %rollback_err, "rollback failed, discarding statement result");
            Err(rollback_err)
        }
    }
}

async fn run_in_transaction(
    tx: &mut (dyn ReadOnlyTransaction + '_),
    sql: &str,
    params: &ParameterSet,
) -> Result<QueryOutcome, DashError> {
    tx.probe().await?;

    let start = Instant::now();
    let fetched = tx.fetch(sql, params, DISPLAY_LIMIT + 1).await?;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let outcome = match fetched {
        Fetched::Rows { columns, mut rows } => {
            let truncated = rows.len() > DISPLAY_LIMIT;
            rows.truncate(DISPLAY_LIMIT);
            debug!(rows = rows.len(), truncated, duration_ms, "statement returned rows");
            QueryOutcome::Rows {
                columns,
                rows: displayable_rows(rows),
                truncated,
                duration_ms,
            }
        }
        Fetched::NoRowSet { status } => {
            debug!(status = %status, duration_ms, "statement returned no row set");
            QueryOutcome::Status {
                message: status,
                duration_ms,
            }
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::MULTI_STATEMENT_ERROR;
    use crate::testing::ScriptedBackend;

    fn no_params() -> ParameterSet {
        ParameterSet::default()
    }

    #[tokio::test]
    async fn one_result_per_query_in_order() {
        let mut backend = ScriptedBackend::new()
            .with_int_rows("select a from t", 3)
            .with_status("set local work_mem = '1MB'", "SET")
            .with_error("select nope from t", "column \"nope\" does not exist");

        let queries = [
            "select a from t",
            "select nope from t",
            "select 1; select 2",
            "set local work_mem = '1MB'",
            "select a from t",
        ];
        let results = run_queries(&mut backend, &queries, &no_params()).await;

        assert_eq!(results.len(), queries.len());
        for (result, sql) in results.iter().zip(queries) {
            assert_eq!(result.sql, sql);
        }
        assert_eq!(results[0].rows().len(), 3);
        assert!(results[1].is_error());
        assert_eq!(results[2].error_message(), Some(MULTI_STATEMENT_ERROR));
        assert_eq!(results[3].cell(0, "statusmessage"), Some(Some("SET".into())));
        assert_eq!(results[4].rows().len(), 3);
    }

    #[tokio::test]
    async fn rejected_statement_never_reaches_the_database() {
        let mut backend = ScriptedBackend::new();
        let result = run_statement(&mut backend, "select 1; delete from t", &no_params()).await;

        assert_eq!(result.error_message(), Some(MULTI_STATEMENT_ERROR));
        assert!(backend.log().is_empty());
    }

    #[tokio::test]
    async fn trailing_separators_still_execute() {
        let mut backend = ScriptedBackend::new().with_int_rows("select 1;;", 1);
        let result = run_statement(&mut backend, "  select 1;;  ", &no_params()).await;

        assert!(!result.is_error());
        assert_eq!(result.sql, "select 1;;");
        assert_eq!(result.rows().len(), 1);
    }

    #[tokio::test]
    async fn probe_runs_before_statement_and_rollback_always_follows() {
        let mut backend = ScriptedBackend::new()
            .with_int_rows("select a from t", 1)
            .with_error("select boom", "division by zero");

        run_statement(&mut backend, "select a from t", &no_params()).await;
        run_statement(&mut backend, "select boom", &no_params()).await;

        assert_eq!(
            backend.log(),
            &[
                "BEGIN READ ONLY",
                "SELECT 1",
                "FETCH select a from t LIMIT 101",
                "ROLLBACK",
                "BEGIN READ ONLY",
                "SELECT 1",
                "FETCH select boom LIMIT 101",
                "ROLLBACK",
            ]
        );
    }

    #[tokio::test]
    async fn failed_probe_skips_statement_but_rolls_back() {
        let mut backend = ScriptedBackend::new()
            .with_int_rows("select 1", 1)
            .failing_probe("cannot execute in a read-only transaction");

        let result = run_statement(&mut backend, "select 1", &no_params()).await;

        assert!(result.is_error());
        assert_eq!(backend.log(), &["BEGIN READ ONLY", "SELECT 1", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn failed_begin_is_an_error_result() {
        let mut backend = ScriptedBackend::new().failing_begin("connection closed");
        let result = run_statement(&mut backend, "select 1", &no_params()).await;

        assert_eq!(result.error_message(), Some("Invalid: connection closed"));
        assert_eq!(result.duration_ms(), None);
    }

    #[tokio::test]
    async fn failed_rollback_discards_rows() {
        let mut backend = ScriptedBackend::new()
            .with_int_rows("select 1", 1)
            .failing_rollback("server closed the connection unexpectedly");

        let result = run_statement(&mut backend, "select 1", &no_params()).await;

        assert!(result.is_error());
        assert!(result.rows().is_empty());
    }

    #[tokio::test]
    async fn caps_rows_and_flags_truncation() {
        let mut backend = ScriptedBackend::new()
            .with_int_rows("select many", 150)
            .with_int_rows("select few", 50)
            .with_int_rows("select exact", 100);

        let many = run_statement(&mut backend, "select many", &no_params()).await;
        assert_eq!(many.rows().len(), DISPLAY_LIMIT);
        assert!(many.truncated());

        let few = run_statement(&mut backend, "select few", &no_params()).await;
        assert_eq!(few.rows().len(), 50);
        assert!(!few.truncated());

        let exact = run_statement(&mut backend, "select exact", &no_params()).await;
        assert_eq!(exact.rows().len(), 100);
        assert!(!exact.truncated());
    }

    #[tokio::test]
    async fn status_outcome_is_not_an_error() {
        let mut backend = ScriptedBackend::new().with_status("listen jobs", "LISTEN");
        let result = run_statement(&mut backend, "listen jobs", &no_params()).await;

        assert!(!result.is_error());
        assert!(!result.truncated());
        assert_eq!(result.rows().len(), 1);
        assert!(result.duration_ms().is_some());
    }

    #[tokio::test]
    async fn runtime_error_has_message_and_no_duration() {
        let mut backend = ScriptedBackend::new()
            .with_error("select nope", "column \"nope\" does not exist")
            .with_int_rows("select 1", 1);

        let results = run_queries(&mut backend, &["select nope", "select 1"], &no_params()).await;

        let failed = &results[0];
        assert!(failed
            .error_message()
            .is_some_and(|m| m.contains("does not exist")));
        assert!(failed.rows().is_empty());
        assert_eq!(failed.duration_ms(), None);

        assert!(!results[1].is_error());
        assert!(results[1].duration_ms().is_some());
    }

    #[tokio::test]
    async fn parameters_reach_the_backend() {
        let mut backend = ScriptedBackend::new().with_int_rows("select %(start_date)s", 1);
        let params: ParameterSet = [("start_date", "2020-01-01")].into_iter().collect();

        run_statement(&mut backend, "select %(start_date)s", &params).await;

        assert_eq!(
            backend.bound(),
            &[vec![("start_date".to_string(), "2020-01-01".to_string())]]
        );
    }
}
