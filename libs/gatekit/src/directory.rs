//! Cached lookup of named groups, tiers and users.
//!
//! [`Directory`] wraps an async [`DirectoryBackend`] with a process-wide
//! read-through cache. Group and tier names are scoped to the owning
//! admin account from [`DirectoryConfig`]; users are keyed by email.
//! Entries live until the configured TTL expires (`None` caches forever)
//! or until an explicit [`Directory::invalidate`] call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Group whose members hold every action on every resource.
pub const ADMIN_GROUP: &str = "admin";

/// Group standing for "every caller, authenticated or not".
pub const PUBLIC_GROUP: &str = "public";

/// Group standing for unauthenticated callers only.
pub const ANONYMOUS_GROUP: &str = "anonymous";

/// Tier granted to admin callers.
pub const UNLIMITED_TIER: &str = "unlimited";

/// Tier granted to everyone else.
pub const BASIC_TIER: &str = "basic";

/// Faults from directory lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Backend(String),

    #[error("unknown {kind} '{name}'")]
    Missing { kind: &'static str, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
}

/// Async seam to whatever stores groups, tiers and users.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn group(&self, owner: &str, name: &str) -> Result<Option<GroupRecord>, DirectoryError>;

    async fn group_by_id(&self, owner: &str, id: Uuid)
    -> Result<Option<GroupRecord>, DirectoryError>;

    async fn tier(&self, owner: &str, name: &str) -> Result<Option<TierRecord>, DirectoryError>;

    async fn user(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

/// Bootstrap configuration: the owning admin account and cache policy.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Email of the account owning the well-known groups and tiers.
    pub admin_email: String,
    /// Cache entry lifetime; `None` caches for the process lifetime.
    pub ttl: Option<Duration>,
}

impl DirectoryConfig {
    #[must_use]
    pub fn new(admin_email: impl Into<String>) -> Self {
        Self {
            admin_email: admin_email.into(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Cache key; also the handle for manual invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DirectoryKey {
    Group(String),
    GroupId(Uuid),
    Tier(String),
    User(String),
}

#[derive(Clone)]
enum CacheValue {
    Group(GroupRecord),
    Tier(TierRecord),
    User(UserRecord),
}

struct CacheEntry {
    value: CacheValue,
    inserted: Instant,
}

/// Read-through cache over a [`DirectoryBackend`].
pub struct Directory {
    backend: Arc<dyn DirectoryBackend>,
    config: DirectoryConfig,
    cache: RwLock<HashMap<DirectoryKey, CacheEntry>>,
}

impl Directory {
    #[must_use]
    pub fn new(backend: Arc<dyn DirectoryBackend>, config: DirectoryConfig) -> Self {
        Self {
            backend,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Look up a group owned by the admin account.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Missing`] when no such group exists, or
    /// [`DirectoryError::Backend`] when the lookup itself fails.
    pub async fn group(&self, name: &str) -> Result<GroupRecord, DirectoryError> {
        let key = DirectoryKey::Group(name.to_owned());
        if let Some(CacheValue::Group(record)) = self.fresh(&key) {
            return Ok(record);
        }
        let record = self
            .backend
            .group(&self.config.admin_email, name)
            .await?
            .ok_or_else(|| DirectoryError::Missing {
                kind: "group",
                name: name.to_owned(),
            })?;
        self.remember(key, CacheValue::Group(record.clone()));
        Ok(record)
    }

    /// Look up a group of the admin account by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Missing`] when no such group exists, or
    /// [`DirectoryError::Backend`] when the lookup itself fails.
    pub async fn group_by_id(&self, id: Uuid) -> Result<GroupRecord, DirectoryError> {
        let key = DirectoryKey::GroupId(id);
        if let Some(CacheValue::Group(record)) = self.fresh(&key) {
            return Ok(record);
        }
        let record = self
            .backend
            .group_by_id(&self.config.admin_email, id)
            .await?
            .ok_or_else(|| DirectoryError::Missing {
                kind: "group",
                name: id.to_string(),
            })?;
        self.remember(key, CacheValue::Group(record.clone()));
        Ok(record)
    }

    /// Look up a tier owned by the admin account.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Missing`] when no such tier exists, or
    /// [`DirectoryError::Backend`] when the lookup itself fails.
    pub async fn tier(&self, name: &str) -> Result<TierRecord, DirectoryError> {
        let key = DirectoryKey::Tier(name.to_owned());
        if let Some(CacheValue::Tier(record)) = self.fresh(&key) {
            return Ok(record);
        }
        let record = self
            .backend
            .tier(&self.config.admin_email, name)
            .await?
            .ok_or_else(|| DirectoryError::Missing {
                kind: "tier",
                name: name.to_owned(),
            })?;
        self.remember(key, CacheValue::Tier(record.clone()));
        Ok(record)
    }

    /// Look up a user by email.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Missing`] when no such user exists, or
    /// [`DirectoryError::Backend`] when the lookup itself fails.
    pub async fn user(&self, email: &str) -> Result<UserRecord, DirectoryError> {
        let key = DirectoryKey::User(email.to_owned());
        if let Some(CacheValue::User(record)) = self.fresh(&key) {
            return Ok(record);
        }
        let record =
            self.backend
                .user(email)
                .await?
                .ok_or_else(|| DirectoryError::Missing {
                    kind: "user",
                    name: email.to_owned(),
                })?;
        self.remember(key, CacheValue::User(record.clone()));
        Ok(record)
    }

    /// Drop one cached entry.
    pub fn invalidate(&self, key: &DirectoryKey) {
        self.cache.write().remove(key);
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache.write().clear();
    }

    fn fresh(&self, key: &DirectoryKey) -> Option<CacheValue> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if self
            .config
            .ttl
            .is_some_and(|ttl| entry.inserted.elapsed() > ttl)
        {
            return None;
        }
        Some(entry.value.clone())
    }

    fn remember(&self, key: DirectoryKey, value: CacheValue) {
        self.cache.write().insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        group_id: Uuid,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryBackend for CountingBackend {
        async fn group(
            &self,
            _owner: &str,
            name: &str,
        ) -> Result<Option<GroupRecord>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == PUBLIC_GROUP {
                Ok(Some(GroupRecord {
                    id: self.group_id,
                    name: name.to_owned(),
                }))
            } else {
                Ok(None)
            }
        }

        async fn group_by_id(
            &self,
            _owner: &str,
            id: Uuid,
        ) -> Result<Option<GroupRecord>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if id == self.group_id {
                Ok(Some(GroupRecord {
                    id,
                    name: PUBLIC_GROUP.to_owned(),
                }))
            } else {
                Ok(None)
            }
        }

        async fn tier(
            &self,
            _owner: &str,
            _name: &str,
        ) -> Result<Option<TierRecord>, DirectoryError> {
            Ok(None)
        }

        async fn user(&self, _email: &str) -> Result<Option<UserRecord>, DirectoryError> {
            Ok(None)
        }
    }

    fn directory(ttl: Option<Duration>) -> (Arc<CountingBackend>, Directory) {
        let backend = Arc::new(CountingBackend {
            group_id: Uuid::new_v4(),
            calls: AtomicUsize::new(0),
        });
        let mut config = DirectoryConfig::new("root@example.com");
        config.ttl = ttl;
        let directory = Directory::new(backend.clone(), config);
        (backend, directory)
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let (backend, directory) = directory(None);
        let first = directory.group(PUBLIC_GROUP).await.unwrap();
        let second = directory.group(PUBLIC_GROUP).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let (backend, directory) = directory(Some(Duration::ZERO));
        directory.group(PUBLIC_GROUP).await.unwrap();
        directory.group(PUBLIC_GROUP).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_evicts_one_key() {
        let (backend, directory) = directory(None);
        directory.group(PUBLIC_GROUP).await.unwrap();
        directory.invalidate(&DirectoryKey::Group(PUBLIC_GROUP.to_owned()));
        directory.group(PUBLIC_GROUP).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_group_is_an_error() {
        let (_, directory) = directory(None);
        let err = directory.group("ghost").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Missing { kind: "group", .. }));
    }
}
