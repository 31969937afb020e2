//! SurrealDB-backed principal loader.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;
use surrealdb::sql::Datetime;

use crate::auth::principal::{LoadError, Principal, PrincipalLoader};
use crate::db::Db;
use crate::types::UserId;

/// Persisted identity columns of a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Database record identifier
    pub id: RecordId,
    /// Numeric user id carried in tokens
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Inactive users cannot authenticate
    pub is_active: bool,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

impl UserRecord {
    fn into_principal(self) -> Principal {
        Principal::from(UserCreate {
            user_id: self.user_id,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
        })
    }
}

/// Payload for creating a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub user_id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<UserCreate> for Principal {
    fn from(user: UserCreate) -> Self {
        let mut principal = Principal::new(UserId::new(user.user_id), user.username);
        if let Some(name) = user.display_name {
            principal = principal.with_display_name(name);
        }
        if let Some(url) = user.avatar_url {
            principal = principal.with_avatar_url(url);
        }
        principal
    }
}

/// User store for database operations.
pub struct UserStore {
    db: Db,
}

impl UserStore {
    /// Create a new user store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get a user by the numeric id carried in tokens.
    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        let query = "SELECT * FROM user WHERE user_id = $user_id LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.get()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Create a new, active user.
    pub async fn create_user(&self, create: &UserCreate) -> Result<UserRecord> {
        let query = r#"
            CREATE user CONTENT {
                user_id: $user_id,
                username: $username,
                display_name: $display_name,
                avatar_url: $avatar_url,
                is_active: true
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", create.user_id))
            .bind(("username", create.username.clone()))
            .bind(("display_name", create.display_name.clone()))
            .bind(("avatar_url", create.avatar_url.clone()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create user {}", create.user_id))
    }

    /// Deactivate a user account. Outstanding tokens stop authenticating.
    pub async fn deactivate_user(&self, user_id: UserId) -> Result<()> {
        self.set_active(user_id, false).await
    }

    /// Reactivate a user account.
    pub async fn reactivate_user(&self, user_id: UserId) -> Result<()> {
        self.set_active(user_id, true).await
    }

    async fn set_active(&self, user_id: UserId, is_active: bool) -> Result<()> {
        let query = r#"
            UPDATE user SET
                is_active = $is_active
            WHERE user_id = $user_id
        "#;

        self.db
            .query(query)
            .bind(("user_id", user_id.get()))
            .bind(("is_active", is_active))
            .await?
            .check()?;

        Ok(())
    }
}

#[async_trait]
impl PrincipalLoader for UserStore {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError> {
        match self.get_user(id).await {
            Ok(Some(user)) if user.is_active => Ok(user.into_principal()),
            Ok(_) => Err(LoadError::NotFound),
            Err(e) => Err(LoadError::Unavailable(e.to_string())),
        }
    }
}
