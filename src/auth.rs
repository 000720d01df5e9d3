use crate::error::DashError;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const EXECUTE_SQL = 1 << 0;
        const ALL = Self::EXECUTE_SQL.bits();
    }
}

/// The already-authenticated user a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub permissions: Permissions,
}

impl Principal {
    pub fn new(username: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            username: username.into(),
            permissions,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", Permissions::empty())
    }

    pub fn has(&self, needed: Permissions) -> bool {
        self.permissions.contains(needed)
    }
}

pub fn require_permission(principal: &Principal, needed: Permissions) -> Result<(), DashError> {
    if principal.has(needed) {
        Ok(())
    } else {
        Err(DashError::AccessDenied(format!(
            "user '{}' is missing permission {needed:?}",
            principal.username
        )))
    }
}

/// Parse a comma separated permission list such as `execute_sql` or `all`.
pub fn parse_permission_list(input: &str) -> Result<Permissions, DashError> {
    let s = input.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("none") {
        return Ok(Permissions::empty());
    }
    if s.eq_ignore_ascii_case("all") {
        return Ok(Permissions::ALL);
    }
    let mut acc = Permissions::empty();
    for part in s.split(',') {
        let p = part.trim();
        let bit = if p.eq_ignore_ascii_case("execute_sql") || p.eq_ignore_ascii_case("execute sql")
        {
            Permissions::EXECUTE_SQL
        } else {
            return Err(DashError::Invalid(format!("unknown permission: {p}")));
        };
        acc |= bit;
    }
    Ok(acc)
}
