//! Request-level entry points: ad-hoc SQL submissions and saved dashboards.

use crate::auth::{require_permission, Permissions, Principal};
use crate::backend::Backend;
use crate::error::DashError;
use crate::executor::run_queries;
use crate::model::{QueryResult, SavedDashboard};
use crate::params::{FormData, ParameterSet, RESERVED_PARAMETER};
use serde::Serialize;
use tracing::info;

pub const DEFAULT_TITLE: &str = "SQL Dashboard";

/// Display metadata handed through to the renderer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub saved_dashboard: bool,
}

/// Everything the rendering layer needs for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardContext {
    pub query_results: Vec<QueryResult>,
    pub available_tables: Vec<String>,
    pub parameter_values: ParameterSet,
    pub title: Option<String>,
    pub description: Option<String>,
    pub saved_dashboard: bool,
    pub user_can_execute_sql: bool,
}

/// Ad-hoc submission: every non-blank `sql` value of the form, in order.
pub async fn dashboard_index<B>(
    backend: &mut B,
    principal: &Principal,
    form: &FormData,
) -> Result<DashboardContext, DashError>
where
    B: Backend + ?Sized,
{
    require_permission(principal, Permissions::EXECUTE_SQL)?;

    let queries: Vec<String> = form
        .get_all(RESERVED_PARAMETER)
        .into_iter()
        .filter(|q| !q.trim().is_empty())
        .map(str::to_string)
        .collect();

    let meta = DisplayMeta {
        title: Some(DEFAULT_TITLE.to_string()),
        ..DisplayMeta::default()
    };
    render(backend, principal, &queries, form, meta).await
}

/// A stored dashboard, its queries run exactly as stored.
pub async fn saved_dashboard<B>(
    backend: &mut B,
    principal: &Principal,
    dashboard: &SavedDashboard,
    form: &FormData,
) -> Result<DashboardContext, DashError>
where
    B: Backend + ?Sized,
{
    let meta = DisplayMeta {
        title: Some(dashboard.title.clone()),
        description: Some(dashboard.description.clone()),
        saved_dashboard: true,
    };
    render(backend, principal, &dashboard.queries, form, meta).await
}

/// List readable tables, derive parameters, then run the queries in order.
pub async fn render<B>(
    backend: &mut B,
    principal: &Principal,
    queries: &[String],
    form: &FormData,
    meta: DisplayMeta,
) -> Result<DashboardContext, DashError>
where
    B: Backend + ?Sized,
{
    let available_tables = backend.readable_tables().await?;
    let parameter_values = ParameterSet::collect(queries, form);

    let query_results = run_queries(backend, queries, &parameter_values).await;

    let failed = query_results.iter().filter(|r| r.is_error()).count();
    info!(
        user = %principal.username,
        queries = queries.len(),
        failed,
        parameters = parameter_values.len(),
        "dashboard rendered"
    );

    Ok(DashboardContext {
        query_results,
        available_tables,
        parameter_values,
        title: meta.title,
        description: meta.description,
        saved_dashboard: meta.saved_dashboard,
        user_can_execute_sql: principal.has(Permissions::EXECUTE_SQL),
    })
}
