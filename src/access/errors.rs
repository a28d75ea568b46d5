use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AccessError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(rolegate::access::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(rolegate::access::invalid_policy),
        help("Each policy file may contain `rule` nodes and at most one `default` node")
    )]
    InvalidPolicy(String),

    #[error("Invalid path pattern `{0}`")]
    #[diagnostic(
        code(rolegate::access::invalid_pattern),
        help("Patterns are absolute paths using `?`, `*` within a segment, and `**` as a whole segment (e.g. /newuser/**)")
    )]
    InvalidPattern(String),

    #[error("Unknown role `{0}`")]
    #[diagnostic(
        code(rolegate::access::unknown_role),
        help("Known roles are USER, ADMIN and DBA")
    )]
    UnknownRole(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(rolegate::access::kdl_parse),
        help("Check your KDL file syntax (see https://kdl.dev for the specification)")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(rolegate::access::io))]
    Io(#[from] std::io::Error),
}
