use crate::access::types::{Role, RoleSet};
use crate::storage;
use miette::{IntoDiagnostic, Result};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// User definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefinition {
    /// Login name (unique)
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Plain text password, hashed on creation. Existing users keep theirs.
    pub password: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Role names such as `ADMIN` or `ROLE_DBA`; matched case-insensitively.
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Root structure of the users JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersFile {
    pub users: Vec<UserDefinition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Sync users and their roles from a JSON file to the database (idempotent)
pub async fn sync_users_from_file(db: &DatabaseConnection, file_path: &Path) -> Result<SyncSummary> {
    tracing::info!("Loading users from {}", file_path.display());

    let content = fs::read_to_string(file_path).map_err(|e| {
        miette::miette!(
            "Failed to read users file at '{}': {}",
            file_path.display(),
            e
        )
    })?;

    let users_file: UsersFile = serde_json::from_str(&content).map_err(|e| {
        miette::miette!(
            "Failed to parse users JSON file: {}\n\nExpected format:\n{{\n  \"users\": [\n    {{\n      \"username\": \"bill\",\n      \"email\": \"bill@example.com\",\n      \"password\": \"secure-password\",\n      \"enabled\": true,\n      \"roles\": [\"ADMIN\", \"DBA\"]\n    }}\n  ]\n}}",
            e
        )
    })?;

    tracing::info!("Found {} user(s) in file", users_file.users.len());

    let mut summary = SyncSummary::default();
    for user_def in users_file.users {
        match sync_user(db, &user_def).await? {
            SyncResult::Created => summary.created += 1,
            SyncResult::Updated => summary.updated += 1,
            SyncResult::Unchanged => summary.unchanged += 1,
        }
    }

    tracing::info!(
        "User sync complete: {} created, {} updated, {} unchanged",
        summary.created,
        summary.updated,
        summary.unchanged
    );

    Ok(summary)
}

#[derive(Debug)]
enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

fn parse_roles(user_def: &UserDefinition) -> Result<RoleSet> {
    user_def
        .roles
        .iter()
        .map(|name| name.parse::<Role>().into_diagnostic())
        .collect::<Result<RoleSet>>()
        .map_err(|e| miette::miette!("User '{}': {}", user_def.username, e))
}

/// Sync a single user (idempotent)
async fn sync_user(db: &DatabaseConnection, user_def: &UserDefinition) -> Result<SyncResult> {
    let wanted_roles = parse_roles(user_def)?;
    if wanted_roles.is_empty() {
        tracing::warn!(
            "User {} has no roles and will not be able to sign in",
            user_def.username
        );
    }

    let existing = storage::get_user_by_username(db, &user_def.username).await?;

    let (subject, mut result) = match existing {
        None => {
            tracing::info!("Creating user: {}", user_def.username);
            let user = storage::create_user(
                db,
                &user_def.username,
                &user_def.password,
                user_def.email.clone(),
            )
            .await?;

            if !user_def.enabled {
                storage::update_user(db, &user.subject, false, user_def.email.clone(), None)
                    .await?;
            }

            (user.subject, SyncResult::Created)
        }
        Some(existing_user) => {
            let enabled_matches = (existing_user.enabled == 1) == user_def.enabled;
            let email_matches = existing_user.email == user_def.email;

            if !enabled_matches || !email_matches {
                tracing::info!("Updating user: {}", user_def.username);
                storage::update_user(
                    db,
                    &existing_user.subject,
                    user_def.enabled,
                    user_def.email.clone(),
                    None,
                )
                .await?;
                (existing_user.subject, SyncResult::Updated)
            } else {
                (existing_user.subject, SyncResult::Unchanged)
            }
        }
    };

    // Make the stored role set match the file exactly
    let current_roles = storage::get_roles_for_subject(db, &subject).await?;
    if current_roles != wanted_roles {
        for role in wanted_roles.difference(&current_roles) {
            storage::assign_user_profile(db, &subject, *role).await?;
        }
        for role in current_roles.difference(&wanted_roles) {
            storage::remove_user_profile(db, &subject, *role).await?;
        }
        tracing::debug!(
            "Synced roles for user {}: {:?}",
            user_def.username,
            wanted_roles
        );
        if matches!(result, SyncResult::Unchanged) {
            result = SyncResult::Updated;
        }
    }

    Ok(result)
}
