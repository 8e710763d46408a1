//! Session Record Store
//!
//! The persistence contract consumed by the controller. Records are always
//! written as whole documents; `update` is guarded by the `version` the caller
//! read, so a concurrent writer surfaces as [`SessionError::Conflict`] instead
//! of a silently lost update.

use crate::{
    error::{SessionError, SessionResult},
    session::{NewSession, Session},
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new record and returns it with its assigned id.
    async fn insert(&self, new: NewSession) -> SessionResult<Session>;

    async fn get(&self, id: Uuid) -> SessionResult<Option<Session>>;

    /// Replaces the stored record if its version still equals `session.version`.
    /// The owner is never rewritten. Returns the stored record with the bumped version.
    async fn update(&self, session: &Session) -> SessionResult<Session>;

    /// Deletes the given sessions owned by `owner_id`. Returns how many were removed.
    async fn delete_many(&self, owner_id: &str, ids: &[Uuid]) -> SessionResult<u64>;

    /// Sessions owned by `owner_id`, newest first.
    async fn list(&self, owner_id: &str) -> SessionResult<Vec<Session>>;
}

/// A process-local store used by tests and local development.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, new: NewSession) -> SessionResult<Session> {
        let session = new.into_session(Uuid::new_v4(), Utc::now());
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> SessionResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &Session) -> SessionResult<Session> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or(SessionError::NotFound(session.id))?;
        if stored.version != session.version {
            return Err(SessionError::Conflict(session.id));
        }

        let mut updated = session.clone();
        updated.owner_id = stored.owner_id.clone();
        updated.version = stored.version + 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_many(&self, owner_id: &str, ids: &[Uuid]) -> SessionResult<u64> {
        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for id in ids {
            if sessions.get(id).is_some_and(|s| s.owner_id == owner_id) {
                sessions.remove(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn list(&self, owner_id: &str) -> SessionResult<Vec<Session>> {
        let mut owned: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}
