use std::path::Path;

use crate::access::errors::AccessError;
use crate::access::pattern::PathPattern;
use crate::access::policy::parse_kdl_document;
use crate::access::types::*;
use crate::access::AccessPolicy;

/// Rules compiled into the binary, used when no policies directory is configured.
pub const BUILTIN_POLICY: &str = include_str!("../../policies/default.kdl");

pub fn builtin_policy() -> Result<AccessPolicy, AccessError> {
    let parsed = parse_kdl_document(BUILTIN_POLICY)?;
    compile_policies(vec![parsed])
}

/// Load all `.kdl` policy files from the given directory, in file name
/// order, and compile them into a single `AccessPolicy`. Rule order across
/// files follows file order.
pub fn load_policies(dir: &Path) -> Result<AccessPolicy, AccessError> {
    if !dir.is_dir() {
        return Err(AccessError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in &entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AccessError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }

    let policy = compile_policies(all_parsed)?;

    tracing::info!(
        files = entries.len(),
        rules = policy.rules.len(),
        default = ?policy.default,
        "Loaded access policies"
    );

    Ok(policy)
}

/// Merge parsed policies, preserving rule order, and validate every
/// pattern and role.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<AccessPolicy, AccessError> {
    let mut rules = Vec::new();
    let mut default: Option<DefaultPolicy> = None;

    for p in parsed {
        if let Some(value) = p.default {
            if default.is_some() {
                return Err(AccessError::InvalidPolicy(
                    "`default` is declared in more than one policy file".into(),
                ));
            }
            default = Some(value.parse()?);
        }
        for def in p.rules {
            rules.push(compile_rule(def)?);
        }
    }

    Ok(AccessPolicy {
        rules,
        default: default.unwrap_or_default(),
    })
}

fn compile_rule(def: RuleDef) -> Result<AccessRule, AccessError> {
    if def.paths.is_empty() {
        return Err(AccessError::InvalidPolicy(format!(
            "rule `{}` has no paths",
            def.name
        )));
    }

    let patterns = def
        .paths
        .iter()
        .map(|p| PathPattern::parse(p))
        .collect::<Result<Vec<_>, _>>()?;

    let roles = def
        .roles
        .iter()
        .map(|r| r.parse::<Role>())
        .collect::<Result<Vec<_>, _>>()?;

    let predicate = match def.access.as_str() {
        "any-role" => {
            if roles.is_empty() {
                return Err(AccessError::InvalidPolicy(format!(
                    "rule `{}` grants access to any of its roles but lists none",
                    def.name
                )));
            }
            RolePredicate::AnyOf(roles)
        }
        other => {
            if !roles.is_empty() {
                return Err(AccessError::InvalidPolicy(format!(
                    "rule `{}` lists roles but access `{other}` ignores them",
                    def.name
                )));
            }
            match other {
                "permit-all" => RolePredicate::PermitAll,
                "authenticated" => RolePredicate::Authenticated,
                "deny-all" => RolePredicate::DenyAll,
                _ => {
                    return Err(AccessError::InvalidPolicy(format!(
                        "rule `{}` has unknown access `{other}` (expected any-role, permit-all, authenticated or deny-all)",
                        def.name
                    )))
                }
            }
        }
    };

    Ok(AccessRule {
        name: def.name,
        patterns,
        predicate,
    })
}
