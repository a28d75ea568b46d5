use serde::Serialize;

use crate::access::types::{Role, RoleSet};

/// An authenticated principal, loaded once per request.
///
/// The role set is never empty; a user without roles cannot be an `Identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    roles: RoleSet,
}

impl Identity {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        password_hash: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
    ) -> Option<Self> {
        let roles: RoleSet = roles.into_iter().collect();
        if roles.is_empty() {
            return None;
        }
        Some(Self {
            user_id: user_id.into(),
            username: username.into(),
            password_hash: password_hash.into(),
            roles,
        })
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
