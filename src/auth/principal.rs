//! Principals and the loader boundary.
//!
//! The auth layer never reads user records itself. Once a token has been
//! verified, the subject id is handed to a [`PrincipalLoader`], which is the
//! only capability the rest of the backend has to provide.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{UserId, Username};

/// Resolved identity of an authenticated unit of work.
///
/// Authorization scope is binary here: holding a `Principal` means "is an
/// authenticated user". There are no roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: UserId,
    username: Username,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl Principal {
    pub fn new(id: UserId, username: impl Into<Username>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar_url.as_deref()
    }

    /// Display name if set, otherwise the username.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.username.as_str())
    }
}

/// Loader failures. `Unavailable` is retryable; `NotFound` is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Subject does not exist or is deactivated
    NotFound,
    /// Backing store could not answer
    Unavailable(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Principal not found"),
            Self::Unavailable(msg) => write!(f, "Principal store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Loads a principal by subject id. Must be safe to call concurrently.
#[async_trait]
pub trait PrincipalLoader: Send + Sync {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError>;
}

#[async_trait]
impl<L: PrincipalLoader + ?Sized> PrincipalLoader for Arc<L> {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError> {
        (**self).load_by_id(id).await
    }
}

#[derive(Debug, Clone)]
struct StoredPrincipal {
    principal: Principal,
    is_active: bool,
}

/// In-memory principal store.
///
/// Used by the development server and by tests. Deactivated and removed
/// users both load as `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    users: RwLock<HashMap<UserId, StoredPrincipal>>,
}

impl MemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with active principals.
    pub fn with_principals(principals: impl IntoIterator<Item = Principal>) -> Self {
        let users = principals
            .into_iter()
            .map(|principal| {
                (
                    principal.id(),
                    StoredPrincipal {
                        principal,
                        is_active: true,
                    },
                )
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub async fn insert(&self, principal: Principal) {
        self.users.write().await.insert(
            principal.id(),
            StoredPrincipal {
                principal,
                is_active: true,
            },
        );
    }

    /// Returns false if the user does not exist.
    pub async fn deactivate(&self, id: UserId) -> bool {
        self.set_active(id, false).await
    }

    /// Returns false if the user does not exist.
    pub async fn reactivate(&self, id: UserId) -> bool {
        self.set_active(id, true).await
    }

    pub async fn remove(&self, id: UserId) -> Option<Principal> {
        self.users.write().await.remove(&id).map(|s| s.principal)
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    async fn set_active(&self, id: UserId, is_active: bool) -> bool {
        match self.users.write().await.get_mut(&id) {
            Some(stored) => {
                stored.is_active = is_active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PrincipalLoader for MemoryPrincipalStore {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError> {
        match self.users.read().await.get(&id) {
            Some(stored) if stored.is_active => Ok(stored.principal.clone()),
            _ => Err(LoadError::NotFound),
        }
    }
}

/// Short-lived denylist of revoked subjects in front of another loader.
///
/// Tokens cannot be revoked once issued. Putting a subject on the denylist
/// makes the loader step report `NotFound` for it until the entry lapses,
/// which should be no shorter than the token lifetime. A TTL too large to
/// represent as a deadline makes entries permanent.
pub struct Denylist<L> {
    inner: L,
    /// Deadline per subject; `None` never lapses
    entries: RwLock<HashMap<UserId, Option<Instant>>>,
    ttl: Duration,
}

impl<L> Denylist<L> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Deny every token for `id` until the entry expires.
    pub async fn revoke(&self, id: UserId) {
        let until = Instant::now().checked_add(self.ttl);
        self.entries.write().await.insert(id, until);
    }

    /// Lift a revocation early. Returns false if `id` was not denied.
    pub async fn restore(&self, id: UserId) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    pub async fn is_revoked(&self, id: UserId) -> bool {
        match self.entries.read().await.get(&id) {
            Some(until) => until.is_none_or(|until| Instant::now() < until),
            None => false,
        }
    }

    /// Drop lapsed entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, until| until.is_none_or(|until| now < until));
        before - entries.len()
    }
}

#[async_trait]
impl<L: PrincipalLoader> PrincipalLoader for Denylist<L> {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError> {
        if self.is_revoked(id).await {
            debug!(user_id = %id, "Subject is on the revocation denylist");
            return Err(LoadError::NotFound);
        }
        self.inner.load_by_id(id).await
    }
}
