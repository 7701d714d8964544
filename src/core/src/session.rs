//! Verified sessions and the enforced authorization context
//!
//! The session service authenticates a request and hands back a
//! [`VerifiedSession`]. Subsystems that mutate protected state never accept a
//! caller-supplied actor id; they take an [`AuthContext`], whose only public
//! constructor is [`AuthContext::from_verified_session`]. A call site can
//! therefore not fabricate an identity without first holding a verified
//! session for it.

use crate::id::UserId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An authenticated session, produced by the session service after token
/// verification.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    user_id: UserId,
    session_id: Uuid,
    verified_at: DateTime<Utc>,
}

impl VerifiedSession {
    /// Record a session the session service has verified.
    ///
    /// This is the seam to the external identity layer; everything downstream
    /// trusts that the caller only constructs this after real verification.
    pub fn new(user_id: UserId, session_id: Uuid) -> Self {
        Self {
            user_id,
            session_id,
            verified_at: Utc::now(),
        }
    }

    /// The authenticated account
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Session identifier, for audit correlation
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// When the session token was verified
    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }
}

/// Opaque proof of an authenticated actor.
///
/// Fields are private and there is no other constructor: holding an
/// `AuthContext` is holding the capability to act as `actor_id`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    actor_id: UserId,
    session_id: Uuid,
}

impl AuthContext {
    /// Exchange a verified session for an authorization context.
    pub fn from_verified_session(session: &VerifiedSession) -> Self {
        Self {
            actor_id: session.user_id().clone(),
            session_id: session.session_id(),
        }
    }

    /// The authenticated actor this context stands for
    pub fn actor_id(&self) -> &UserId {
        &self.actor_id
    }

    /// Originating session, for audit correlation
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}
