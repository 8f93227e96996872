//! Per-connection token storage.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use estate_auth_core::Session;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Holds at most one session. Replacement is atomic, so readers never see a
/// partially updated token triple.
#[derive(Debug, Default)]
pub struct TokenStore {
    session: RwLock<Option<Session>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    pub async fn set(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    pub async fn get(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn clear(&self) -> Option<Session> {
        self.session.write().await.take()
    }

    /// Store a refreshed session, unless the store was cleared or now holds
    /// another subject's session. Returns whether the session was stored.
    pub async fn update(&self, session: Session) -> bool {
        let mut current = self.session.write().await;
        match current.as_ref() {
            Some(existing) if existing.subject_id() == session.subject_id() => {
                *current = Some(session);
                true
            }
            _ => false,
        }
    }
}

/// Opaque identifier of a connection's token store, carried in a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token stores of all live connections, keyed by `SessionId`.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    stores: Arc<DashMap<SessionId, RegistryEntry>>,
}

#[derive(Debug)]
struct RegistryEntry {
    store: Arc<TokenStore>,
    /// Unix seconds of the last lookup.
    last_seen: AtomicI64,
}

impl RegistryEntry {
    fn new(store: Arc<TokenStore>, now: DateTime<Utc>) -> Self {
        Self {
            store,
            last_seen: AtomicI64::new(now.timestamp()),
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty store under a fresh id.
    pub fn create(&self) -> (SessionId, Arc<TokenStore>) {
        let store = Arc::new(TokenStore::new());
        (self.insert(store.clone()), store)
    }

    /// Register `store` under a fresh id. Every sign-in gets a new id.
    pub fn insert(&self, store: Arc<TokenStore>) -> SessionId {
        let id = SessionId::new();
        self.stores.insert(id, RegistryEntry::new(store, Utc::now()));
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<TokenStore>> {
        self.stores.get(id).map(|entry| {
            entry.last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
            entry.store.clone()
        })
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<TokenStore>> {
        self.stores.remove(id).map(|(_, entry)| entry.store)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub async fn sweep(&self, idle_timeout: Duration) -> usize {
        self.sweep_at(Utc::now(), idle_timeout).await
    }

    /// Drop stores that are empty or have not been looked up within
    /// `idle_timeout`. Returns the number removed.
    pub async fn sweep_at(&self, now: DateTime<Utc>, idle_timeout: Duration) -> usize {
        let cutoff = (now - idle_timeout).timestamp();
        let entries: Vec<(SessionId, Arc<TokenStore>, i64)> = self
            .stores
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    entry.store.clone(),
                    entry.last_seen.load(Ordering::Relaxed),
                )
            })
            .collect();

        let mut removed = 0;
        for (id, store, last_seen) in entries {
            if last_seen < cutoff || store.get().await.is_none() {
                let evicted = self
                    .stores
                    .remove_if(&id, |_, entry| Arc::ptr_eq(&entry.store, &store));
                if evicted.is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed, remaining = self.stores.len(), "swept session stores");
        }
        removed
    }
}
