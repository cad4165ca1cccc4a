//! Prompt Sessions
//!
//! Per-user state for two-step prompt capture. A session is either idle or
//! awaiting a prompt; the awaiting state carries a time-to-live so a stale
//! capture can never attach itself to an unrelated later message.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::UserId;
use crate::error::{GenerateError, Result};

/// Prompt capture state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PromptState {
    Idle,
    AwaitingPrompt { expires_at: DateTime<Utc> },
}

/// A user's prompt session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptSession {
    pub user: UserId,
    pub state: PromptState,
    pub updated_at: DateTime<Utc>,
}

impl PromptSession {
    pub fn idle(user: UserId) -> Self {
        Self {
            user,
            state: PromptState::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Start waiting for a prompt, valid for `ttl` from `now`
    pub fn awaiting(user: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user,
            state: PromptState::AwaitingPrompt {
                expires_at: now + ttl,
            },
            updated_at: now,
        }
    }

    /// Awaiting and not yet expired at `now`
    pub fn is_awaiting_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            PromptState::AwaitingPrompt { expires_at } => now < expires_at,
            PromptState::Idle => false,
        }
    }

    /// Awaiting, but the TTL has run out
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, PromptState::AwaitingPrompt { expires_at } if now >= expires_at)
    }
}

/// Session store trait for persistence
pub trait SessionStore: Send + Sync {
    /// Load a user's session
    fn get(&self, user: &UserId) -> Result<Option<PromptSession>>;

    /// Save or replace a user's session
    fn set(&self, session: &PromptSession) -> Result<()>;

    /// Drop a user's session
    fn clear(&self, user: &UserId) -> Result<()>;

    /// Remove and return a user's session in one step
    ///
    /// Two callers racing on the same user see the session at most once.
    fn take(&self, user: &UserId) -> Result<Option<PromptSession>>;
}

/// In-memory session store
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<UserId, PromptSession>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Remove every session whose TTL has run out; returns how many were dropped
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        let purged = before - sessions.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired prompt sessions");
        }
        Ok(purged)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> GenerateError {
    GenerateError::Session("session store lock poisoned".into())
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user: &UserId) -> Result<Option<PromptSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(user).cloned())
    }

    fn set(&self, session: &PromptSession) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.user.clone(), session.clone());
        Ok(())
    }

    fn clear(&self, user: &UserId) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.remove(user);
        Ok(())
    }

    fn take(&self, user: &UserId) -> Result<Option<PromptSession>> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(user))
    }
}
