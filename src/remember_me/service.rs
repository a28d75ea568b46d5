use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::identity::Identity;
use crate::remember_me::errors::RememberMeError;
use crate::remember_me::{PersistentToken, TokenRepository, UserDirectory};

const TOKEN_BYTES: usize = 16;

/// Target for theft events, so they can be routed apart from ordinary logs.
pub const SECURITY_LOG_TARGET: &str = "rolegate::security";

/// A freshly issued or rotated pair, to be written to the client cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub series: String,
    pub token_value: String,
}

/// Result of a successful auto-login.
#[derive(Debug, Clone)]
pub struct RememberMeLogin {
    pub identity: Identity,
    /// Same series, new token value.
    pub token: IssuedToken,
}

/// Issues, validates and revokes remember-me logins.
///
/// A login stays valid for `validity_secs` after its last use: issuance and
/// every rotation restart the window.
pub struct RememberMeService<R, U> {
    tokens: R,
    users: U,
    validity_secs: i64,
}

impl<R: TokenRepository, U: UserDirectory> RememberMeService<R, U> {
    pub fn new(tokens: R, users: U, validity_secs: i64) -> Self {
        Self {
            tokens,
            users,
            validity_secs,
        }
    }

    pub fn validity_secs(&self) -> i64 {
        self.validity_secs
    }

    /// Start a new remembered login for `user_id` with a fresh series.
    pub async fn issue(&self, user_id: &str) -> Result<IssuedToken, RememberMeError> {
        let token = PersistentToken {
            series: random_token(),
            user_id: user_id.to_string(),
            token_value: random_token(),
            last_used: Utc::now().timestamp(),
        };
        self.tokens.create_token(&token).await?;

        tracing::debug!(user_id, "Issued remember-me login");

        Ok(IssuedToken {
            series: token.series,
            token_value: token.token_value,
        })
    }

    /// Authenticate with a cookie pair and rotate its token.
    ///
    /// A superseded token for a live series purges the series. Expired
    /// logins are rejected without rotation and left for the sweep.
    pub async fn validate(
        &self,
        series: &str,
        token_value: &str,
    ) -> Result<RememberMeLogin, RememberMeError> {
        let stored = self
            .tokens
            .get_token(series)
            .await?
            .ok_or(RememberMeError::NotFound)?;

        if !constant_time_eq(stored.token_value.as_bytes(), token_value.as_bytes()) {
            self.tokens.remove_token(series).await?;
            tracing::warn!(
                target: SECURITY_LOG_TARGET,
                series,
                user_id = %stored.user_id,
                "Remember-me token reused after rotation; series removed"
            );
            return Err(RememberMeError::TheftSuspected {
                series: series.to_string(),
                user_id: stored.user_id,
            });
        }

        let now = Utc::now().timestamp();
        if stored.last_used.saturating_add(self.validity_secs) < now {
            tracing::debug!(series, user_id = %stored.user_id, "Remember-me login expired");
            return Err(RememberMeError::Expired);
        }

        let Some(identity) = self.users.find_identity(&stored.user_id).await? else {
            self.tokens.remove_token(series).await?;
            return Err(RememberMeError::UserNotFound(stored.user_id));
        };

        let new_value = random_token();
        if !self
            .tokens
            .rotate_token(series, token_value, &new_value, now)
            .await?
        {
            tracing::debug!(series, "Lost remember-me rotation race");
            return Err(RememberMeError::Contended);
        }

        Ok(RememberMeLogin {
            identity,
            token: IssuedToken {
                series: series.to_string(),
                token_value: new_value,
            },
        })
    }

    /// Forget one remembered device (logout).
    pub async fn invalidate(&self, series: &str) -> Result<(), RememberMeError> {
        self.tokens.remove_token(series).await?;
        Ok(())
    }

    /// Forget every remembered device of a user.
    pub async fn invalidate_user(&self, user_id: &str) -> Result<u64, RememberMeError> {
        Ok(self.tokens.remove_user_tokens(user_id).await?)
    }

    /// Delete logins whose validity window has passed.
    pub async fn sweep_expired(&self) -> Result<u64, RememberMeError> {
        let cutoff = Utc::now().timestamp().saturating_sub(self.validity_secs);
        Ok(self.tokens.remove_tokens_used_before(cutoff).await?)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tokens_are_distinct() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        // 16 bytes, unpadded base64url
        assert_eq!(a.len(), 22);
        assert!(!a.contains(':'));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
