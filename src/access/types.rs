use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::access::errors::AccessError;
use crate::access::pattern::PathPattern;

/// Permission group attached to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    Dba,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Admin, Role::Dba];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Dba => "DBA",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    /// Accepts `admin`, `ADMIN` and `ROLE_ADMIN`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == name)
            .ok_or_else(|| AccessError::UnknownRole(s.to_string()))
    }
}

/// The caller's roles. Empty for anonymous callers.
pub type RoleSet = BTreeSet<Role>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Condition a rule places on the caller's role set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolePredicate {
    /// Allowed if the caller holds at least one of the listed roles.
    AnyOf(Vec<Role>),
    /// Allowed for everyone, including anonymous callers.
    PermitAll,
    /// Allowed for any caller holding at least one role.
    Authenticated,
    DenyAll,
}

impl RolePredicate {
    pub fn any_of(roles: impl IntoIterator<Item = Role>) -> Self {
        RolePredicate::AnyOf(roles.into_iter().collect())
    }

    pub fn evaluate(&self, roles: &RoleSet) -> Decision {
        let allowed = match self {
            RolePredicate::AnyOf(required) => required.iter().any(|r| roles.contains(r)),
            RolePredicate::PermitAll => true,
            RolePredicate::Authenticated => !roles.is_empty(),
            RolePredicate::DenyAll => false,
        };
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Policy applied to paths no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPolicy {
    #[default]
    Authenticated,
    PermitAll,
    DenyAll,
}

impl DefaultPolicy {
    pub fn predicate(self) -> RolePredicate {
        match self {
            DefaultPolicy::Authenticated => RolePredicate::Authenticated,
            DefaultPolicy::PermitAll => RolePredicate::PermitAll,
            DefaultPolicy::DenyAll => RolePredicate::DenyAll,
        }
    }
}

impl FromStr for DefaultPolicy {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authenticated" => Ok(DefaultPolicy::Authenticated),
            "permit-all" => Ok(DefaultPolicy::PermitAll),
            "deny-all" => Ok(DefaultPolicy::DenyAll),
            other => Err(AccessError::InvalidPolicy(format!(
                "unknown default policy `{other}` (expected authenticated, permit-all or deny-all)"
            ))),
        }
    }
}

/// A compiled rule: any of `patterns` selects it, `predicate` decides.
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub name: String,
    pub patterns: Vec<PathPattern>,
    pub predicate: RolePredicate,
}

impl AccessRule {
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

// ---------- Parsed (uncompiled) policy ----------

/// A rule as written in a policy file, before patterns and roles are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDef {
    pub name: String,
    /// "any-role", "permit-all", "authenticated" or "deny-all"
    pub access: String,
    pub paths: Vec<String>,
    pub roles: Vec<String>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub rules: Vec<RuleDef>,
    pub default: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("dba".parse::<Role>().unwrap(), Role::Dba);
        assert_eq!("ROLE_USER".parse::<Role>().unwrap(), Role::User);
        assert!(matches!(
            "ROOT".parse::<Role>(),
            Err(AccessError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_any_of_is_an_or() {
        let predicate = RolePredicate::any_of([Role::Admin, Role::Dba]);
        assert_eq!(predicate.evaluate(&RoleSet::from([Role::Dba])), Decision::Allow);
        assert_eq!(
            predicate.evaluate(&RoleSet::from([Role::User, Role::Admin])),
            Decision::Allow
        );
        assert_eq!(predicate.evaluate(&RoleSet::from([Role::User])), Decision::Deny);
        assert_eq!(predicate.evaluate(&RoleSet::new()), Decision::Deny);
    }

    #[test]
    fn test_authenticated_requires_a_role() {
        let predicate = RolePredicate::Authenticated;
        assert_eq!(predicate.evaluate(&RoleSet::new()), Decision::Deny);
        assert_eq!(predicate.evaluate(&RoleSet::from([Role::User])), Decision::Allow);
        assert_eq!(RolePredicate::PermitAll.evaluate(&RoleSet::new()), Decision::Allow);
        assert_eq!(
            RolePredicate::DenyAll.evaluate(&RoleSet::from([Role::Admin])),
            Decision::Deny
        );
    }

    #[test]
    fn test_default_policy_parse() {
        assert_eq!(
            "permit-all".parse::<DefaultPolicy>().unwrap(),
            DefaultPolicy::PermitAll
        );
        assert_eq!(DefaultPolicy::default(), DefaultPolicy::Authenticated);
        assert!("sometimes".parse::<DefaultPolicy>().is_err());
    }
}
