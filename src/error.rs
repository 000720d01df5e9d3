use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashError {
    #[error("{}", format_postgres_error(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Missing value for parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid: {0}")]
    Invalid(String),
}

/// Render a driver error the way a dashboard user wants to read it: the
/// server message first, then detail, hint and SQLSTATE when present.
pub fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {detail})"));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {hint})"));
        }
    }

    format!("{message} (code: {})", db_error.code().code())
}
