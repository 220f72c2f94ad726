//! Caller roles and the access level they grant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROLE_SUPER_ADMIN: &str = "ROLE_SUPER_ADMIN";
pub const ROLE_PARENT: &str = "ROLE_PARENT";

/// Access level derived from a caller's roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Full read access, no scope filtering
    Unrestricted,
    /// Limited to the caller's authorized person ids
    Restricted,
}

impl AccessLevel {
    /// Resolve the access level for a set of role names.
    /// Super admin takes precedence over parent; anything else is refused.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Option<Self> {
        if roles.iter().any(|r| r.as_ref() == ROLE_SUPER_ADMIN) {
            Some(AccessLevel::Unrestricted)
        } else if roles.iter().any(|r| r.as_ref() == ROLE_PARENT) {
            Some(AccessLevel::Restricted)
        } else {
            None
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, AccessLevel::Restricted)
    }

    pub fn supported_roles() -> [&'static str; 2] {
        [ROLE_SUPER_ADMIN, ROLE_PARENT]
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessLevel::Unrestricted => write!(f, "unrestricted"),
            AccessLevel::Restricted => write!(f, "restricted"),
        }
    }
}

/// Normalize the role claim of an identity token into a list of role names.
///
/// Accepts a JSON array, a JSON-encoded array inside a string, a single
/// JSON string, or a bare role name.
pub fn parse_roles(raw: &Value) -> Vec<String> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        Value::String(s) => parse_role_string(s),
        other => vec![other.to_string()],
    }
}

fn parse_role_string(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        Ok(Value::String(s)) => vec![s],
        _ => vec![trimmed.to_string()],
    }
}
