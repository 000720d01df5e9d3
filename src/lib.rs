//! Read-only SQL dashboard engine for PostgreSQL.
//!
//! Every submitted statement is guarded against stacking, then run in its
//! own `READ ONLY` transaction that is always rolled back. Results come
//! back one per statement, in submission order.

pub mod auth;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod executor;
pub mod format;
pub mod guard;
pub mod model;
pub mod params;
pub mod postgres;

#[cfg(test)]
mod testing;

pub use backend::{Backend, Fetched, ReadOnlyTransaction};
pub use dashboard::{dashboard_index, saved_dashboard, DashboardContext};
pub use error::DashError;
pub use executor::{run_queries, run_statement};
pub use model::{QueryOutcome, QueryResult, DISPLAY_LIMIT};
pub use params::{extract_named_parameters, FormData, ParameterSet};
