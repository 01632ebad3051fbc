//! Identity collaborator
//!
//! The core never sees passwords. It is handed an opaque session handle and
//! asks an [`IdentityProvider`] who is behind it. [`SessionRegistry`] is the
//! in-process provider: it issues ULID handles with a TTL after the caller
//! has verified the credential elsewhere.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core_types::UserId;
use crate::error::ExchangeError;
use crate::user_account::User;

/// Verified caller identity, passed explicitly into every operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id(),
            is_admin: user.is_admin(),
        }
    }
}

/// Opaque session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(ulid::Ulid);

impl SessionToken {
    fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionToken {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s)
            .map(Self)
            .map_err(|_| ExchangeError::Unauthorized)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a session handle to a verified actor
    ///
    /// # Errors
    /// `Unauthorized` for unknown, revoked or expired handles.
    async fn resolve(&self, token: &SessionToken) -> Result<Actor, ExchangeError>;
}

#[derive(Debug, Clone)]
struct Session {
    actor: Actor,
    expires_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    sessions: DashMap<SessionToken, Session>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Issue a handle for a user whose credential was already verified
    pub fn issue(&self, user: &User) -> Result<SessionToken, ExchangeError> {
        if user.is_banned() {
            return Err(ExchangeError::forbidden("user is banned"));
        }
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|_| ExchangeError::validation("session_ttl", "out of range"))?;
        let now = Utc::now();
        self.purge_expired(now);
        let token = SessionToken::generate();
        self.sessions.insert(
            token,
            Session {
                actor: Actor::from(user),
                expires_at: now + ttl,
            },
        );
        info!(user_id = %user.id(), "Session issued");
        Ok(token)
    }

    pub fn revoke(&self, token: &SessionToken) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every session of a user (ban, role change)
    pub fn revoke_user(&self, user_id: UserId) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.actor.user_id != user_id);
        let removed = before.saturating_sub(self.sessions.len());
        debug!(user_id = %user_id, removed, "Sessions revoked");
        removed
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "Expired sessions purged");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl IdentityProvider for SessionRegistry {
    async fn resolve(&self, token: &SessionToken) -> Result<Actor, ExchangeError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| s.clone())
            .ok_or(ExchangeError::Unauthorized)?;

        if session.expires_at <= Utc::now() {
            self.sessions.remove(token);
            return Err(ExchangeError::Unauthorized);
        }
        Ok(session.actor)
    }
}
