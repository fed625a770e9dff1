//! Session token verification and revocation.
//!
//! Tokens carry a profile snapshot, but role and account status can change
//! after issuance. Every successful decode therefore re-reads the live
//! profile; blocked accounts are rejected no matter what the token says.
//! Logged-out tokens are remembered by `jti` until they would have expired
//! anyway.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use civic_shared::session::{SessionClaims, SessionCodec};
use civic_shared::types::ProfileId;
use civic_shared::SessionError;
use civic_store::{Profile, StoreError};

use crate::error::ServerError;
use crate::state::Store;

#[derive(Debug, Error)]
pub enum SessionRejection {
    #[error("Authentication required")]
    Missing,

    #[error("Invalid or expired token")]
    Invalid,

    #[error("Session has been logged out")]
    Revoked,

    #[error("Account is blocked")]
    Blocked,

    #[error("Session lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl From<SessionRejection> for ServerError {
    fn from(e: SessionRejection) -> Self {
        match e {
            SessionRejection::Missing | SessionRejection::Invalid | SessionRejection::Revoked => {
                ServerError::Unauthorized(e.to_string())
            }
            SessionRejection::Blocked => ServerError::Forbidden(e.to_string()),
            SessionRejection::Store(inner) => ServerError::Internal(inner.to_string()),
        }
    }
}

/// A verified caller: the decoded claims plus the live profile.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub claims: SessionClaims,
    pub profile: Profile,
}

/// Verifies session tokens and tracks revoked ones.
#[derive(Clone)]
pub struct SessionVerifier {
    codec: SessionCodec,
    db: Store,
    /// Revoked `jti` -> the token's own expiry.
    revoked: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl SessionVerifier {
    pub fn new(codec: SessionCodec, db: Store) -> Self {
        Self {
            codec,
            db,
            revoked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Decode `token` and load the caller's current profile.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Authenticated, SessionRejection> {
        let token = token.ok_or(SessionRejection::Missing)?;

        let claims = self.codec.decode(token).map_err(|e| match e {
            SessionError::Missing => SessionRejection::Missing,
            other => {
                debug!(error = %other, "Session token rejected");
                SessionRejection::Invalid
            }
        })?;

        let profile = self.refresh(&claims).await?;
        Ok(Authenticated { claims, profile })
    }

    /// Re-check already decoded claims: not expired, not revoked, profile
    /// still present and not blocked. Returns the profile as it is now.
    pub async fn refresh(&self, claims: &SessionClaims) -> Result<Profile, SessionRejection> {
        if claims.expires_at() <= Utc::now() {
            return Err(SessionRejection::Invalid);
        }
        if self.revoked.read().await.contains_key(&claims.jti) {
            return Err(SessionRejection::Revoked);
        }

        let profile_id =
            ProfileId::parse(&claims.sub).map_err(|_| SessionRejection::Invalid)?;

        let profile = match self.db.call(move |db| db.get_profile(profile_id)).await {
            Ok(profile) => profile,
            Err(StoreError::NotFound) => return Err(SessionRejection::Invalid),
            Err(e) => return Err(e.into()),
        };

        if profile.account_status.is_blocked() {
            return Err(SessionRejection::Blocked);
        }

        Ok(profile)
    }

    /// Reject `claims.jti` from now until the token's natural expiry.
    pub async fn revoke(&self, claims: &SessionClaims) {
        let mut revoked = self.revoked.write().await;
        revoked.insert(claims.jti.clone(), claims.expires_at());
        info!(profile = %claims.sub, "Session revoked");
    }

    /// Evict revocations whose tokens have expired on their own.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let mut revoked = self.revoked.write().await;
        let before = revoked.len();
        revoked.retain(|_, expires_at| *expires_at > now);
        let removed = before - revoked.len();
        if removed > 0 {
            debug!(removed, "Purged expired session revocations");
        }
    }

    #[cfg(test)]
    pub(crate) async fn revoked_count(&self) -> usize {
        self.revoked.read().await.len()
    }
}
