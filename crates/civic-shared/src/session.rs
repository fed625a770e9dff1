//! Session tokens.
//!
//! A session token is an HS256 JWT embedding a [`ProfileSnapshot`] taken at
//! issuance time. The snapshot is informational: servers re-read the live
//! profile by `sub` before trusting role or status.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SESSION_TTL_SECS;
use crate::error::SessionError;
use crate::protocol::ProfileSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Profile id as a string.
    pub sub: String,
    pub profile: ProfileSnapshot,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Unique token id, used for logout revocation.
    pub jti: String,
}

impl SessionClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// A freshly minted token with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies session tokens with a server-held secret.
#[derive(Clone)]
pub struct SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        Self::with_ttl(secret, issuer, Duration::seconds(SESSION_TTL_SECS))
    }

    pub fn with_ttl(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `profile`, valid from `now` for the codec's ttl.
    pub fn issue_at(
        &self,
        profile: &ProfileSnapshot,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, SessionError> {
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sub: profile.id.to_string(),
            profile: profile.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(SessionError::Signing)?;
        Ok(IssuedSession { token, expires_at })
    }

    pub fn issue(&self, profile: &ProfileSnapshot) -> Result<IssuedSession, SessionError> {
        self.issue_at(profile, Utc::now())
    }

    /// Verify signature, issuer and expiry, returning the claims.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Missing);
        }

        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(e),
            })
    }
}

/// Pull a bearer token out of an `Authorization` header value.
///
/// Accepts both `Bearer <token>` (scheme matched case-insensitively) and a
/// raw token. A scheme with nothing after it yields `None`.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let value = header_value.trim_start();
    let token = match value.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &value[6..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest
            } else {
                value
            }
        }
        _ => value,
    }
    .trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountStatus, CredentialId, ProfileId, Role};

    fn snapshot() -> ProfileSnapshot {
        ProfileSnapshot {
            id: ProfileId::new(),
            credential_id: CredentialId::new(),
            display_name: "Voter 4821".into(),
            phone: "5551234567".into(),
            role: Role::Voter,
            photo_url: "https://example.org/p.png".into(),
            region_id: "unassigned".into(),
            account_status: AccountStatus::Active,
        }
    }

    #[test]
    fn test_issue_and_decode() {
        let codec = SessionCodec::new(b"test_secret", "test_issuer");
        let profile = snapshot();
        let issued = codec.issue(&profile).unwrap();

        let claims = codec.decode(&issued.token).unwrap();
        assert_eq!(claims.profile, profile);
        assert_eq!(claims.sub, profile.id.to_string());
        assert_eq!(claims.exp - claims.iat, SESSION_TTL_SECS);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let a = SessionCodec::new(b"secret1", "iss");
        let b = SessionCodec::new(b"secret2", "iss");
        let issued = a.issue(&snapshot()).unwrap();
        assert!(matches!(b.decode(&issued.token), Err(SessionError::Invalid(_))));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let codec = SessionCodec::new(b"secret", "iss");
        let victim = codec.issue(&snapshot()).unwrap();
        let mut forged = snapshot();
        forged.role = Role::Admin;
        let other = codec.issue(&forged).unwrap();

        // Splice the forged payload onto the victim's signature.
        let v: Vec<&str> = victim.token.split('.').collect();
        let o: Vec<&str> = other.token.split('.').collect();
        let tampered = format!("{}.{}.{}", v[0], o[1], v[2]);
        assert!(matches!(codec.decode(&tampered), Err(SessionError::Invalid(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = SessionCodec::new(b"secret", "iss");
        let issued = codec
            .issue_at(&snapshot(), Utc::now() - Duration::days(8))
            .unwrap();
        assert!(matches!(codec.decode(&issued.token), Err(SessionError::Expired)));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let codec = SessionCodec::new(b"secret", "iss");
        assert!(matches!(codec.decode("  "), Err(SessionError::Missing)));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("BEARER  abc "), Some("abc"));
        assert_eq!(bearer_token("Bearerabc"), Some("Bearerabc"));
    }
}
