//! Persistent remember-me logins.
//!
//! A remembered device holds a `(series, token)` pair. The series is fixed
//! for the life of the login; the token is replaced on every successful
//! use. Presenting a superseded token for a live series means the cookie
//! was copied, so the whole series is purged.

pub mod cookie;
pub mod errors;
pub mod service;

use async_trait::async_trait;

use crate::errors::GateError;
use crate::identity::Identity;

pub use cookie::RememberMeCookie;
pub use errors::RememberMeError;
pub use service::{IssuedToken, RememberMeLogin, RememberMeService};

/// Stored state of one remembered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentToken {
    pub series: String,
    pub user_id: String,
    pub token_value: String,
    /// Unix seconds of issuance or the latest rotation.
    pub last_used: i64,
}

/// Persistence for remember-me records, keyed by series.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn create_token(&self, token: &PersistentToken) -> Result<(), GateError>;

    async fn get_token(&self, series: &str) -> Result<Option<PersistentToken>, GateError>;

    /// Replace the token value of `series` only if it still equals
    /// `expected`. Returns `false` when another writer got there first.
    async fn rotate_token(
        &self,
        series: &str,
        expected: &str,
        new_value: &str,
        last_used: i64,
    ) -> Result<bool, GateError>;

    async fn remove_token(&self, series: &str) -> Result<(), GateError>;

    async fn remove_user_tokens(&self, user_id: &str) -> Result<u64, GateError>;

    async fn remove_tokens_used_before(&self, cutoff: i64) -> Result<u64, GateError>;
}

/// Resolves a user id to its current identity and roles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` when the user is unknown, disabled, or holds no roles.
    async fn find_identity(&self, user_id: &str) -> Result<Option<Identity>, GateError>;
}
