//! Phone + one-time-code authentication.
//!
//! `request_code` issues a code and hands it to the configured
//! [`OtpSender`]; `verify_code` checks it, creates the profile on first
//! success, and mints a session token.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use civic_shared::constants::{
    DEFAULT_PHOTO_URL, DEFAULT_REGION, OTP_RESEND_SECS, OTP_TTL_SECS,
};
use civic_shared::otp;
use civic_shared::session::{IssuedSession, SessionCodec};
use civic_shared::types::{normalize_phone, AccountStatus, ProfileId, Role};
use civic_shared::SessionError;
use civic_store::{IssuedCode, Profile, StoreError};

use crate::delivery::OtpSender;
use crate::error::ServerError;
use crate::rate_limit::PhoneLimiter;
use crate::state::Store;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("A valid phone number is required")]
    InvalidPhone,

    #[error("Account is blocked")]
    AccountBlocked,

    #[error("No code was requested for this phone number")]
    NotFound,

    /// Deliberately does not say which of the two it was.
    #[error("Invalid or expired OTP")]
    InvalidOrExpired,

    #[error("Too many codes requested; try again later")]
    TooManyCodes { retry_after_secs: u64 },

    #[error("Failed to deliver OTP: {0}")]
    Delivery(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidPhone | AuthError::InvalidOrExpired => {
                ServerError::BadRequest(e.to_string())
            }
            AuthError::AccountBlocked => ServerError::Forbidden(e.to_string()),
            AuthError::NotFound => ServerError::NotFound(e.to_string()),
            AuthError::TooManyCodes { retry_after_secs } => {
                ServerError::TooManyRequests { retry_after_secs }
            }
            AuthError::Delivery(_) | AuthError::Store(_) | AuthError::Session(_) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

/// Optional location reported alongside a code request.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct GeoHint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Outcome of a code request.
#[derive(Debug, Clone)]
pub struct CodeIssued {
    pub resend_after: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Present only when the server is configured to expose codes.
    pub code: Option<String>,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct Verified {
    pub session: IssuedSession,
    pub profile: Profile,
    /// Whether this verification created the profile.
    pub created: bool,
}

pub struct AuthService {
    db: Store,
    codec: SessionCodec,
    sender: Arc<dyn OtpSender>,
    phone_limiter: PhoneLimiter,
    expose_codes: bool,
}

impl AuthService {
    pub fn new(
        db: Store,
        codec: SessionCodec,
        sender: Arc<dyn OtpSender>,
        phone_limiter: PhoneLimiter,
        expose_codes: bool,
    ) -> Self {
        Self {
            db,
            codec,
            sender,
            phone_limiter,
            expose_codes,
        }
    }

    pub fn phone_limiter(&self) -> &PhoneLimiter {
        &self.phone_limiter
    }

    pub async fn request_code(
        &self,
        raw_phone: &str,
        geo: Option<GeoHint>,
    ) -> Result<CodeIssued, AuthError> {
        self.request_code_at(raw_phone, geo, Utc::now()).await
    }

    pub async fn request_code_at(
        &self,
        raw_phone: &str,
        geo: Option<GeoHint>,
        now: DateTime<Utc>,
    ) -> Result<CodeIssued, AuthError> {
        let phone = normalize_phone(raw_phone).ok_or(AuthError::InvalidPhone)?;

        if let Some(geo) = geo {
            debug!(phone = %phone, lat = geo.latitude, lon = geo.longitude, "OTP request location");
        }

        let decision = self.phone_limiter.check(&phone).await;
        if !decision.is_allowed() {
            warn!(phone = %phone, "Too many codes requested for phone");
            return Err(AuthError::TooManyCodes {
                retry_after_secs: decision.retry_after_secs(),
            });
        }

        let key = phone.clone();
        let (code, issued) = self
            .db
            .call(move |db| {
                let existing = db.find_credential_by_phone(&key)?;

                if existing
                    .as_ref()
                    .is_some_and(|c| c.account_status.is_blocked())
                {
                    warn!(phone = %key, "OTP requested for blocked account");
                    return Err(AuthError::AccountBlocked);
                }

                let previous = existing.as_ref().and_then(|c| c.otp_hash.as_deref());
                let code = otp::generate_code_excluding(&mut rand::thread_rng(), previous, &key);
                let issued = IssuedCode {
                    otp_hash: otp::hash_code(&key, &code),
                    otp_expires_at: now + Duration::seconds(OTP_TTL_SECS),
                    resend_available_at: now + Duration::seconds(OTP_RESEND_SECS),
                };
                db.upsert_credential_code(&key, &issued, now)?;
                Ok((code, issued))
            })
            .await?;

        self.sender
            .send(&phone, &code)
            .await
            .map_err(|e| AuthError::Delivery(e.to_string()))?;

        info!(phone = %phone, resend_after = %issued.resend_available_at, "OTP issued");

        Ok(CodeIssued {
            resend_after: issued.resend_available_at,
            expires_at: issued.otp_expires_at,
            code: self.expose_codes.then_some(code),
        })
    }

    pub async fn verify_code(&self, raw_phone: &str, submitted: &str) -> Result<Verified, AuthError> {
        self.verify_code_at(raw_phone, submitted, Utc::now()).await
    }

    pub async fn verify_code_at(
        &self,
        raw_phone: &str,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<Verified, AuthError> {
        let phone = normalize_phone(raw_phone).ok_or(AuthError::InvalidPhone)?;

        let key = phone.clone();
        let submitted = submitted.to_string();
        let (profile, created) = self
            .db
            .call(move |db| {
                let credential = db
                    .find_credential_by_phone(&key)?
                    .ok_or(AuthError::NotFound)?;

                if credential.account_status.is_blocked() {
                    return Err(AuthError::AccountBlocked);
                }

                let (Some(stored_hash), Some(expires_at)) =
                    (credential.otp_hash.as_deref(), credential.otp_expires_at)
                else {
                    return Err(AuthError::InvalidOrExpired);
                };

                if now > expires_at || !otp::code_matches(&key, &submitted, stored_hash) {
                    debug!(phone = %key, "OTP rejected");
                    return Err(AuthError::InvalidOrExpired);
                }

                if !db.consume_credential_code(credential.id, stored_hash, now)? {
                    // Consumed or replaced by a concurrent request.
                    return Err(AuthError::InvalidOrExpired);
                }

                let placeholder = Profile {
                    id: ProfileId::new(),
                    credential_id: credential.id,
                    display_name: placeholder_name(),
                    phone: key.clone(),
                    role: Role::Voter,
                    photo_url: DEFAULT_PHOTO_URL.to_string(),
                    region_id: DEFAULT_REGION.to_string(),
                    account_status: AccountStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                Ok(db.insert_profile_if_absent(&placeholder)?)
            })
            .await?;

        if profile.account_status.is_blocked() {
            return Err(AuthError::AccountBlocked);
        }

        if created {
            info!(profile = %profile.id, phone = %phone, "Created profile on first verification");
        }

        let session = self.codec.issue_at(&profile.snapshot(), now)?;
        info!(profile = %profile.id, role = %profile.role, "Session issued");

        Ok(Verified {
            session,
            profile,
            created,
        })
    }
}

fn placeholder_name() -> String {
    format!("Citizen{:04}", rand::thread_rng().gen_range(0..10_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::testing::{FailingSender, RecordingSender};
    use crate::rate_limit::Quota;
    use civic_store::Database;

    fn roomy_limiter() -> PhoneLimiter {
        PhoneLimiter::new(Quota::per_period(100, std::time::Duration::from_secs(60)))
    }

    fn service(expose: bool) -> (AuthService, Arc<RecordingSender>, Store) {
        let db = Store::new(Database::open_in_memory().unwrap());
        let sender = Arc::new(RecordingSender::default());
        let svc = AuthService::new(
            db.clone(),
            SessionCodec::new(b"test", "test"),
            sender.clone(),
            roomy_limiter(),
            expose,
        );
        (svc, sender, db)
    }

    #[tokio::test]
    async fn test_request_issues_six_digit_code_and_cooldown() {
        let (svc, sender, _) = service(true);
        let now = Utc::now();

        let issued = svc.request_code_at("5551234567", None, now).await.unwrap();
        let code = issued.code.clone().unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(issued.resend_after, now + Duration::seconds(30));
        assert_eq!(issued.expires_at, now + Duration::minutes(10));
        assert_eq!(sender.last_code(), Some(code));
    }

    #[tokio::test]
    async fn test_code_hidden_when_not_exposed() {
        let (svc, sender, _) = service(false);
        let issued = svc.request_code("5551234567", None).await.unwrap();
        assert!(issued.code.is_none());
        assert!(sender.last_code().is_some());
    }

    #[tokio::test]
    async fn test_rerequest_within_cooldown_gives_fresh_code() {
        let (svc, _, _) = service(true);
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);

        let first = svc.request_code_at("5551234567", None, t0).await.unwrap();
        let second = svc.request_code_at("5551234567", None, t1).await.unwrap();

        assert_ne!(first.code, second.code);
        assert_eq!(second.expires_at, t1 + Duration::minutes(10));
        assert!(second.resend_after >= t1 + Duration::seconds(30));

        // Only the latest code is accepted.
        let stale = svc
            .verify_code_at("5551234567", &first.code.unwrap(), t1)
            .await;
        assert!(matches!(stale, Err(AuthError::InvalidOrExpired)));
        svc.verify_code_at("5551234567", &second.code.unwrap(), t1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_succeeds_until_expiry_boundary() {
        let (svc, _, _) = service(true);
        let now = Utc::now();
        let code = svc
            .request_code_at("5551234567", None, now)
            .await
            .unwrap()
            .code
            .unwrap();

        let at_expiry = now + Duration::seconds(OTP_TTL_SECS);
        let verified = svc.verify_code_at("5551234567", &code, at_expiry).await.unwrap();
        assert_eq!(verified.profile.role, Role::Voter);
        assert!(verified.created);
    }

    #[tokio::test]
    async fn test_verify_after_expiry_fails_even_with_right_code() {
        let (svc, _, _) = service(true);
        let now = Utc::now();
        let code = svc
            .request_code_at("5551234567", None, now)
            .await
            .unwrap()
            .code
            .unwrap();

        let late = now + Duration::seconds(OTP_TTL_SECS + 1);
        let result = svc.verify_code_at("5551234567", &code, late).await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpired)));
    }

    #[tokio::test]
    async fn test_wrong_code_and_unknown_phone() {
        let (svc, _, _) = service(true);
        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        let wrong = if code == "111111" { "222222" } else { "111111" };

        assert!(matches!(
            svc.verify_code("5551234567", wrong).await,
            Err(AuthError::InvalidOrExpired)
        ));
        assert!(matches!(
            svc.verify_code("5550001111", "123456").await,
            Err(AuthError::NotFound)
        ));
        assert!(matches!(
            svc.request_code("not a phone", None).await,
            Err(AuthError::InvalidPhone)
        ));
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (svc, _, _) = service(true);
        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        svc.verify_code("5551234567", &code).await.unwrap();
        assert!(matches!(
            svc.verify_code("5551234567", &code).await,
            Err(AuthError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_second_verification_reuses_profile() {
        let (svc, _, _) = service(true);

        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        let first = svc.verify_code("555-123-4567", &code).await.unwrap();

        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        let second = svc.verify_code("5551234567", &code).await.unwrap();

        assert_eq!(first.profile.id, second.profile.id);
        assert!(first.created);
        assert!(!second.created);
    }

    #[tokio::test]
    async fn test_blocked_account_cannot_request() {
        let (svc, _, db) = service(true);
        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        let verified = svc.verify_code("5551234567", &code).await.unwrap();

        db.lock()
            .await
            .set_account_status(verified.profile.id, AccountStatus::Blocked)
            .unwrap();

        assert!(matches!(
            svc.request_code("5551234567", None).await,
            Err(AuthError::AccountBlocked)
        ));
    }

    #[tokio::test]
    async fn test_delivery_failure_surfaces() {
        let db = Store::new(Database::open_in_memory().unwrap());
        let svc = AuthService::new(
            db,
            SessionCodec::new(b"test", "test"),
            Arc::new(FailingSender),
            roomy_limiter(),
            true,
        );
        assert!(matches!(
            svc.request_code("5551234567", None).await,
            Err(AuthError::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn test_phone_budget_spans_addresses_and_formats() {
        let db = Store::new(Database::open_in_memory().unwrap());
        let sender = Arc::new(RecordingSender::default());
        let svc = AuthService::new(
            db,
            SessionCodec::new(b"test", "test"),
            sender.clone(),
            PhoneLimiter::new(Quota::per_period(2, std::time::Duration::from_secs(600))),
            true,
        );

        // Both spellings normalize to the same phone, so they share a budget.
        svc.request_code("5551234567", None).await.unwrap();
        svc.request_code("555-123-4567", None).await.unwrap();
        let denied = svc.request_code("(555) 123 4567", None).await;
        assert!(matches!(
            denied,
            Err(AuthError::TooManyCodes { retry_after_secs }) if retry_after_secs >= 299
        ));
        assert_eq!(sender.sent_count(), 2);

        // Another phone is unaffected.
        svc.request_code("5559876543", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_embeds_profile_snapshot() {
        let (svc, _, _) = service(true);
        let code = svc.request_code("5551234567", None).await.unwrap().code.unwrap();
        let verified = svc.verify_code("5551234567", &code).await.unwrap();

        let claims = SessionCodec::new(b"test", "test")
            .decode(&verified.session.token)
            .unwrap();
        assert_eq!(claims.profile, verified.profile.snapshot());
    }
}
