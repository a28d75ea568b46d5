use crate::access::errors::AccessError;
use crate::access::types::*;
use kdl::KdlDocument;

/// Parse a KDL document string into uncompiled policy rules.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AccessError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AccessError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "rule" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AccessError::InvalidPolicy(
                        "rule node requires a string argument (e.g. rule \"admin-pages\" access=\"any-role\")"
                            .into(),
                    )
                })?;

                let access = node
                    .get("access")
                    .and_then(|v| v.as_string())
                    .unwrap_or("any-role")
                    .to_string();

                let mut paths = Vec::new();
                let mut roles = Vec::new();

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "paths" => {
                                paths = dash_list(child);
                            }
                            "roles" => {
                                roles = dash_list(child);
                            }
                            other => {
                                return Err(AccessError::InvalidPolicy(format!(
                                    "unexpected child `{other}` in rule `{name}` (expected `paths` or `roles`)"
                                )));
                            }
                        }
                    }
                }

                policy.rules.push(RuleDef {
                    name,
                    access,
                    paths,
                    roles,
                });
            }
            "default" => {
                let value = first_string_arg(node).ok_or_else(|| {
                    AccessError::InvalidPolicy(
                        "default node requires a string argument (e.g. default \"authenticated\")"
                            .into(),
                    )
                })?;
                if policy.default.is_some() {
                    return Err(AccessError::InvalidPolicy(
                        "`default` may only appear once".into(),
                    ));
                }
                policy.default = Some(value);
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// paths {
///     - "/newuser/**"
///     - "/delete-user-*"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
