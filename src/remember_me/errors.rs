use miette::Diagnostic;
use thiserror::Error;

use crate::errors::GateError;

/// Why a remember-me cookie was not accepted.
///
/// Every variant forces the caller to log in again.
#[derive(Debug, Error, Diagnostic)]
pub enum RememberMeError {
    #[error("No remember-me login exists for this series")]
    #[diagnostic(code(rolegate::remember_me::not_found))]
    NotFound,

    #[error("Remember-me login has expired")]
    #[diagnostic(code(rolegate::remember_me::expired))]
    Expired,

    #[error("Superseded remember-me token presented for series `{series}`; possible cookie theft")]
    #[diagnostic(
        code(rolegate::remember_me::theft_suspected),
        help("All remember-me logins in this series were removed; the user must sign in again")
    )]
    TheftSuspected { series: String, user_id: String },

    #[error("Remember-me token was rotated by a concurrent request")]
    #[diagnostic(code(rolegate::remember_me::contended))]
    Contended,

    #[error("User `{0}` no longer exists or has no roles")]
    #[diagnostic(code(rolegate::remember_me::user_not_found))]
    UserNotFound(String),

    #[error("Remember-me store unavailable: {0}")]
    #[diagnostic(code(rolegate::remember_me::store_unavailable))]
    StoreUnavailable(#[from] GateError),
}

impl RememberMeError {
    pub fn is_theft(&self) -> bool {
        matches!(self, RememberMeError::TheftSuspected { .. })
    }
}
