use crate::access::types::{Role, RoleSet};
use crate::entities;
use crate::errors::GateError;
use crate::identity::Identity;
use crate::remember_me::{PersistentToken, RememberMeService, TokenRepository, UserDirectory};
use crate::settings::Database as DbCfg;
use async_trait::async_trait;
use base64ct::Encoding;
use chrono::Utc;
use migration::MigratorTrait;
use rand::RngCore;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

/// Remember-me service backed by the application database for both tokens
/// and identities.
pub type DbRememberMeService = RememberMeService<DatabaseConnection, DatabaseConnection>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub subject: String,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub created_at: i64,
    pub enabled: i64,
}

impl From<entities::user::Model> for User {
    fn from(model: entities::user::Model) -> Self {
        Self {
            subject: model.subject,
            username: model.username,
            password_hash: model.password_hash,
            email: model.email,
            created_at: model.created_at,
            enabled: model.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i32,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub subject: String,
    pub auth_time: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub user_agent: Option<String>,
    pub remember_me: i64,
}

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, GateError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    email: Option<String>,
) -> Result<User, GateError> {
    let subject = random_id();
    let created_at = Utc::now().timestamp();
    let password_hash = hash_password(password)?;

    let user = entities::user::ActiveModel {
        subject: Set(subject.clone()),
        username: Set(username.to_string()),
        password_hash: Set(password_hash.clone()),
        email: Set(email.clone()),
        created_at: Set(created_at),
        enabled: Set(1),
    };

    user.insert(db).await?;

    Ok(User {
        subject,
        username: username.to_string(),
        password_hash,
        email,
        created_at,
        enabled: 1,
    })
}

fn hash_password(password: &str) -> Result<String, GateError> {
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| GateError::Other(format!("Password hashing failed: {}", e)))
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, GateError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .map(User::from))
}

pub async fn get_user_by_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Option<User>, GateError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
        .map(User::from))
}

/// All users ordered by user name.
pub async fn list_users(db: &DatabaseConnection) -> Result<Vec<User>, GateError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .order_by_asc(Column::Username)
        .all(db)
        .await?
        .into_iter()
        .map(User::from)
        .collect())
}

/// Returns the subject when the user exists, is enabled and the password matches.
pub async fn verify_user_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<String>, GateError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_username(db, username).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| GateError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user.subject))
    } else {
        Ok(None)
    }
}

/// Update enabled flag, email and (optionally) password.
pub async fn update_user(
    db: &DatabaseConnection,
    subject: &str,
    enabled: bool,
    email: Option<String>,
    password: Option<&str>,
) -> Result<(), GateError> {
    use entities::user::{Column, Entity};

    let user = Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
        .ok_or_else(|| GateError::Other(format!("User not found: {}", subject)))?;

    let mut active: entities::user::ActiveModel = user.into();
    active.enabled = Set(if enabled { 1 } else { 0 });
    active.email = Set(email);
    if let Some(password) = password {
        active.password_hash = Set(hash_password(password)?);
    }
    active.update(db).await?;

    Ok(())
}

// User profile (role) functions

fn profile_from_model(model: entities::user_profile::Model) -> Option<UserProfile> {
    match model.profile_type.parse::<Role>() {
        Ok(role) => Some(UserProfile { id: model.id, role }),
        Err(_) => {
            tracing::warn!(
                id = model.id,
                profile_type = %model.profile_type,
                "ignoring user profile with unknown role"
            );
            None
        }
    }
}

pub async fn find_all_user_profiles(db: &DatabaseConnection) -> Result<Vec<UserProfile>, GateError> {
    use entities::user_profile::{Column, Entity};

    Ok(Entity::find()
        .order_by_asc(Column::Id)
        .all(db)
        .await?
        .into_iter()
        .filter_map(profile_from_model)
        .collect())
}

pub async fn find_user_profile_by_type(
    db: &DatabaseConnection,
    role: Role,
) -> Result<Option<UserProfile>, GateError> {
    use entities::user_profile::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::ProfileType.eq(role.as_str()))
        .one(db)
        .await?
        .and_then(profile_from_model))
}

pub async fn find_user_profile_by_id(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<UserProfile>, GateError> {
    use entities::user_profile::Entity;

    Ok(Entity::find_by_id(id)
        .one(db)
        .await?
        .and_then(profile_from_model))
}

/// Give `subject` a role. Assigning a role twice is a no-op.
pub async fn assign_user_profile(
    db: &DatabaseConnection,
    subject: &str,
    role: Role,
) -> Result<(), GateError> {
    use entities::user_user_profile::{Column, Entity};

    let profile = find_user_profile_by_type(db, role)
        .await?
        .ok_or_else(|| GateError::Other(format!("User profile not found: {}", role)))?;

    let existing = Entity::find()
        .filter(Column::Subject.eq(subject))
        .filter(Column::ProfileId.eq(profile.id))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    entities::user_user_profile::ActiveModel {
        subject: Set(subject.to_string()),
        profile_id: Set(profile.id),
    }
    .insert(db)
    .await?;

    Ok(())
}

pub async fn remove_user_profile(
    db: &DatabaseConnection,
    subject: &str,
    role: Role,
) -> Result<(), GateError> {
    use entities::user_user_profile::{Column, Entity};

    if let Some(profile) = find_user_profile_by_type(db, role).await? {
        Entity::delete_many()
            .filter(Column::Subject.eq(subject))
            .filter(Column::ProfileId.eq(profile.id))
            .exec(db)
            .await?;
    }

    Ok(())
}

pub async fn get_roles_for_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<RoleSet, GateError> {
    use entities::user_user_profile::{Column, Entity};

    let profile_ids: Vec<i32> = Entity::find()
        .filter(Column::Subject.eq(subject))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.profile_id)
        .collect();

    if profile_ids.is_empty() {
        return Ok(RoleSet::new());
    }

    Ok(entities::UserProfile::find()
        .filter(entities::user_profile::Column::Id.is_in(profile_ids))
        .all(db)
        .await?
        .into_iter()
        .filter_map(profile_from_model)
        .map(|p| p.role)
        .collect())
}

// Session management functions

pub async fn create_session(
    db: &DatabaseConnection,
    subject: &str,
    auth_time: i64,
    ttl_secs: i64,
    user_agent: Option<String>,
    remember_me: bool,
) -> Result<Session, GateError> {
    let session_id = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;
    let remember_me = if remember_me { 1 } else { 0 };

    let session = entities::session::ActiveModel {
        session_id: Set(session_id.clone()),
        subject: Set(subject.to_string()),
        auth_time: Set(auth_time),
        created_at: Set(now),
        expires_at: Set(expires_at),
        user_agent: Set(user_agent.clone()),
        remember_me: Set(remember_me),
    };

    session.insert(db).await?;

    Ok(Session {
        session_id,
        subject: subject.to_string(),
        auth_time,
        created_at: now,
        expires_at,
        user_agent,
        remember_me,
    })
}

pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, GateError> {
    use entities::session::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::SessionId.eq(session_id))
        .one(db)
        .await?
    {
        // Check if session is expired
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(Session {
            session_id: model.session_id,
            subject: model.subject,
            auth_time: model.auth_time,
            created_at: model.created_at,
            expires_at: model.expires_at,
            user_agent: model.user_agent,
            remember_me: model.remember_me,
        }))
    } else {
        Ok(None)
    }
}

pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<(), GateError> {
    use entities::session::{Column, Entity};

    Entity::delete_many()
        .filter(Column::SessionId.eq(session_id))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, GateError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Persistent login (remember-me) functions

fn token_from_model(model: entities::persistent_login::Model) -> PersistentToken {
    PersistentToken {
        series: model.series,
        user_id: model.subject,
        token_value: model.token,
        last_used: model.last_used,
    }
}

pub async fn create_persistent_login(
    db: &DatabaseConnection,
    token: &PersistentToken,
) -> Result<(), GateError> {
    entities::persistent_login::ActiveModel {
        series: Set(token.series.clone()),
        subject: Set(token.user_id.clone()),
        token: Set(token.token_value.clone()),
        last_used: Set(token.last_used),
    }
    .insert(db)
    .await?;

    Ok(())
}

pub async fn get_persistent_login(
    db: &DatabaseConnection,
    series: &str,
) -> Result<Option<PersistentToken>, GateError> {
    use entities::persistent_login::Entity;

    Ok(Entity::find_by_id(series.to_string())
        .one(db)
        .await?
        .map(token_from_model))
}

/// Conditional update: only succeeds while the stored token still equals
/// `expected`, so two writers holding the same value cannot both rotate.
pub async fn rotate_persistent_login(
    db: &DatabaseConnection,
    series: &str,
    expected: &str,
    new_token: &str,
    last_used: i64,
) -> Result<bool, GateError> {
    use entities::persistent_login::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Token, Expr::value(new_token))
        .col_expr(Column::LastUsed, Expr::value(last_used))
        .filter(Column::Series.eq(series))
        .filter(Column::Token.eq(expected))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

pub async fn delete_persistent_login(db: &DatabaseConnection, series: &str) -> Result<(), GateError> {
    use entities::persistent_login::{Column, Entity};

    Entity::delete_many()
        .filter(Column::Series.eq(series))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn delete_persistent_logins_for_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<u64, GateError> {
    use entities::persistent_login::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Subject.eq(subject))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

pub async fn cleanup_persistent_logins_used_before(
    db: &DatabaseConnection,
    cutoff: i64,
) -> Result<u64, GateError> {
    use entities::persistent_login::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::LastUsed.lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

#[async_trait]
impl TokenRepository for DatabaseConnection {
    async fn create_token(&self, token: &PersistentToken) -> Result<(), GateError> {
        create_persistent_login(self, token).await
    }

    async fn get_token(&self, series: &str) -> Result<Option<PersistentToken>, GateError> {
        get_persistent_login(self, series).await
    }

    async fn rotate_token(
        &self,
        series: &str,
        expected: &str,
        new_value: &str,
        last_used: i64,
    ) -> Result<bool, GateError> {
        rotate_persistent_login(self, series, expected, new_value, last_used).await
    }

    async fn remove_token(&self, series: &str) -> Result<(), GateError> {
        delete_persistent_login(self, series).await
    }

    async fn remove_user_tokens(&self, user_id: &str) -> Result<u64, GateError> {
        delete_persistent_logins_for_subject(self, user_id).await
    }

    async fn remove_tokens_used_before(&self, cutoff: i64) -> Result<u64, GateError> {
        cleanup_persistent_logins_used_before(self, cutoff).await
    }
}

#[async_trait]
impl UserDirectory for DatabaseConnection {
    async fn find_identity(&self, user_id: &str) -> Result<Option<Identity>, GateError> {
        let user = match get_user_by_subject(self, user_id).await? {
            Some(u) if u.enabled == 1 => u,
            _ => return Ok(None),
        };
        let roles = get_roles_for_subject(self, user_id).await?;
        Ok(Identity::new(user.subject, user.username, user.password_hash, roles))
    }
}
