//! Coarse textual defense against stacked statements.

pub const MULTI_STATEMENT_ERROR: &str = "';' not allowed in SQL queries";

/// Reject `sql` if a `;` survives stripping the trailing ones.
///
/// `sql` is expected to be trimmed already. Separators inside string
/// literals are rejected as well.
pub fn check_statement(sql: &str) -> Result<(), &'static str> {
    if sql.trim_end_matches(';').contains(';') {
        return Err(MULTI_STATEMENT_ERROR);
    }
    Ok(())
}
