pub mod engine;
pub mod errors;
pub mod loader;
pub mod pattern;
pub mod policy;
pub mod types;

use types::{AccessRule, Decision, DefaultPolicy, RoleSet};

/// Ordered access rules, compiled once at startup.
/// Immutable after construction; changes require a restart.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Evaluated in order; the first rule whose pattern matches decides.
    pub rules: Vec<AccessRule>,
    /// Applied when no rule matches.
    pub default: DefaultPolicy,
}

impl AccessPolicy {
    pub fn evaluate(&self, path: &str, roles: &RoleSet) -> Decision {
        engine::evaluate(self, path, roles)
    }
}
