use crate::access::pattern::normalize_path;
use crate::access::types::{AccessRule, Decision, RoleSet};
use crate::access::AccessPolicy;

/// Decide whether a caller holding `roles` may access `path`.
///
/// The first rule with a matching pattern governs; later rules are never
/// consulted. Unmatched paths fall back to the policy default.
pub fn evaluate(policy: &AccessPolicy, path: &str, roles: &RoleSet) -> Decision {
    let path = normalize_path(path);

    match first_match(policy, &path) {
        Some(rule) => {
            let decision = rule.predicate.evaluate(roles);
            tracing::trace!(path = %path, rule = %rule.name, ?decision, "access rule matched");
            decision
        }
        None => {
            let decision = policy.default.predicate().evaluate(roles);
            tracing::trace!(path = %path, default = ?policy.default, ?decision, "no access rule matched");
            decision
        }
    }
}

/// Return the rule that governs `path`, if any.
pub fn first_match<'a>(policy: &'a AccessPolicy, path: &str) -> Option<&'a AccessRule> {
    policy.rules.iter().find(|rule| rule.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::loader::builtin_policy;
    use crate::access::pattern::PathPattern;
    use crate::access::types::{DefaultPolicy, Role, RolePredicate};

    fn roles(r: &[Role]) -> RoleSet {
        r.iter().copied().collect()
    }

    fn rule(name: &str, patterns: &[&str], predicate: RolePredicate) -> AccessRule {
        AccessRule {
            name: name.into(),
            patterns: patterns
                .iter()
                .map(|p| PathPattern::parse(p).unwrap())
                .collect(),
            predicate,
        }
    }

    #[test]
    fn test_builtin_home_and_list() {
        let policy = builtin_policy().unwrap();
        for path in ["/", "/list"] {
            assert_eq!(evaluate(&policy, path, &roles(&[Role::User])), Decision::Allow);
            assert_eq!(evaluate(&policy, path, &roles(&[Role::Admin])), Decision::Allow);
            assert_eq!(evaluate(&policy, path, &roles(&[Role::Dba])), Decision::Allow);
            assert_eq!(evaluate(&policy, path, &roles(&[])), Decision::Deny);
        }
    }

    #[test]
    fn test_builtin_admin_only_paths() {
        let policy = builtin_policy().unwrap();
        assert_eq!(evaluate(&policy, "/newuser/x", &roles(&[Role::Dba])), Decision::Deny);
        assert_eq!(evaluate(&policy, "/newuser/x", &roles(&[Role::Admin])), Decision::Allow);
        assert_eq!(evaluate(&policy, "/newuser", &roles(&[Role::Admin])), Decision::Allow);
        assert_eq!(
            evaluate(&policy, "/delete-user-bob", &roles(&[Role::Dba])),
            Decision::Deny
        );
        assert_eq!(
            evaluate(&policy, "/delete-user-bob", &roles(&[Role::Admin])),
            Decision::Allow
        );
    }

    #[test]
    fn test_builtin_edit_user() {
        let policy = builtin_policy().unwrap();
        assert_eq!(evaluate(&policy, "/edit-user-7", &roles(&[Role::User])), Decision::Deny);
        assert_eq!(evaluate(&policy, "/edit-user-7", &roles(&[Role::Admin])), Decision::Allow);
        assert_eq!(evaluate(&policy, "/edit-user-7", &roles(&[Role::Dba])), Decision::Allow);
    }

    #[test]
    fn test_builtin_public_pages_and_default() {
        let policy = builtin_policy().unwrap();
        assert_eq!(evaluate(&policy, "/login", &roles(&[])), Decision::Allow);
        assert_eq!(evaluate(&policy, "/Access_Denied", &roles(&[])), Decision::Allow);
        // unmatched management endpoint: any authenticated role
        assert_eq!(evaluate(&policy, "/reports", &roles(&[])), Decision::Deny);
        assert_eq!(evaluate(&policy, "/reports", &roles(&[Role::User])), Decision::Allow);
    }

    #[test]
    fn test_first_match_wins_over_later_rules() {
        let policy = AccessPolicy {
            rules: vec![
                rule("admins", &["/reports/**"], RolePredicate::any_of([Role::Admin])),
                rule("everyone", &["/reports/daily"], RolePredicate::PermitAll),
            ],
            default: DefaultPolicy::DenyAll,
        };
        // rule 2 would allow a DBA, but rule 1 matched first
        assert_eq!(
            evaluate(&policy, "/reports/daily", &roles(&[Role::Dba])),
            Decision::Deny
        );
        assert_eq!(
            first_match(&policy, "/reports/daily").map(|r| r.name.as_str()),
            Some("admins")
        );

        let reversed = AccessPolicy {
            rules: policy.rules.iter().rev().cloned().collect(),
            default: DefaultPolicy::DenyAll,
        };
        assert_eq!(
            evaluate(&reversed, "/reports/daily", &roles(&[Role::Dba])),
            Decision::Allow
        );
    }

    #[test]
    fn test_default_policy_is_explicit() {
        let mut policy = AccessPolicy {
            rules: vec![],
            default: DefaultPolicy::PermitAll,
        };
        assert_eq!(evaluate(&policy, "/anything", &roles(&[])), Decision::Allow);
        policy.default = DefaultPolicy::DenyAll;
        assert_eq!(
            evaluate(&policy, "/anything", &roles(&[Role::Admin])),
            Decision::Deny
        );
    }

    #[test]
    fn test_dot_segments_cannot_escape_rules() {
        let policy = builtin_policy().unwrap();
        assert_eq!(
            evaluate(&policy, "/login/../newuser/x", &roles(&[Role::User])),
            Decision::Deny
        );
        assert_eq!(
            evaluate(&policy, "//newuser//x", &roles(&[Role::Dba])),
            Decision::Deny
        );
    }
}
