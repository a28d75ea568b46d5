use miette::Diagnostic;
use thiserror::Error;

use crate::access::errors::AccessError;

#[derive(Debug, Error, Diagnostic)]
pub enum GateError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(rolegate::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(rolegate::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(rolegate::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(rolegate::db),
        help("Check that the database in `database.url` is reachable and migrated")
    )]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(#[from] AccessError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(rolegate::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(rolegate::other))]
    Other(String),
}
