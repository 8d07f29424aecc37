//! Password hashing, bearer tokens and external identity verification.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::aggregates::User;
use crate::domain::ids::UserId;
use crate::domain::value_objects::Email;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_PASSWORD_LEN: usize = 6;
const MAX_TOKEN_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("password hashing failed")]
    PasswordHash,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("token secret is unusable")]
    BadSecret,
    #[error("social login is not configured")]
    IdentityUnavailable,
    #[error("identity rejected: {0}")]
    IdentityRejected(String),
}

pub fn ensure_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN { Err(AuthError::WeakPassword) } else { Ok(()) }
}

/// Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "argon2 hashing failed");
            AuthError::PasswordHash
        })
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    Argon2::default().verify_password(password.as_bytes(), &parsed).map_err(|_| AuthError::InvalidCredentials)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub exp: i64,
}

/// Issues and verifies `<claims>.<signature>` bearer tokens, both parts base64url.
#[derive(Clone)]
pub struct TokenService {
    key: HmacSha256,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>, ttl_hours: i64) -> Result<Self, AuthError> {
        let key = <HmacSha256 as Mac>::new_from_slice(secret.as_ref()).map_err(|_| AuthError::BadSecret)?;
        Ok(Self { key, ttl: Duration::hours(ttl_hours) })
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    fn mac(&self) -> HmacSha256 { self.key.clone() }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> { self.issue_at(user, Utc::now()) }

    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims { sub: user.id, email: user.email.to_string(), exp: (now + self.ttl).timestamp() };
        let payload = serde_json::to_vec(&claims).map_err(|_| AuthError::InvalidToken)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{sig}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> { self.verify_at(token, Utc::now()) }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        if token.len() > MAX_TOKEN_LEN { return Err(AuthError::InvalidToken); }
        let (payload, sig) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| AuthError::InvalidToken)?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| AuthError::InvalidToken)?;

        let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| AuthError::InvalidToken)?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)?;
        if claims.exp <= now.timestamp() { return Err(AuthError::TokenExpired); }
        Ok(claims)
    }
}

/// An identity asserted by a provider after signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub email: Email,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Verifies third-party identity tokens (e.g. a Firebase ID token).
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, provider: &str, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ProfileImage;

    fn user() -> User {
        User {
            id: UserId::generate(), name: "Ann".into(), email: Email::parse("ann@example.com").unwrap(),
            profile_image_url: ProfileImage::default(), created_at: Utc::now(), updated_at: Utc::now(),
        }
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash).is_ok());
        assert_eq!(verify_password("hunter23", &hash), Err(AuthError::InvalidCredentials));
        assert_eq!(verify_password("hunter22", "not-a-hash"), Err(AuthError::InvalidCredentials));
    }

    #[test]
    fn password_strength() {
        assert_eq!(ensure_password_strength("12345"), Err(AuthError::WeakPassword));
        assert!(ensure_password_strength("123456").is_ok());
    }

    #[test]
    fn tokens_verify_and_expire() {
        let tokens = TokenService::new("0123456789abcdef0123456789abcdef", 24).unwrap();
        let user = user();
        let now = Utc::now();
        let token = tokens.issue_at(&user, now).unwrap();

        let claims = tokens.verify_at(&token, now).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "ann@example.com");

        assert_eq!(tokens.verify_at(&token, now + Duration::hours(25)), Err(AuthError::TokenExpired));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let tokens = TokenService::new("0123456789abcdef0123456789abcdef", 1).unwrap();
        let token = tokens.issue(&user()).unwrap();

        let other = TokenService::new("fedcba9876543210fedcba9876543210", 1).unwrap();
        assert_eq!(other.verify(&token), Err(AuthError::InvalidToken));

        let (payload, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"00000000-0000-0000-0000-000000000000","email":"x@y.z","exp":9999999999}"#);
        assert_eq!(tokens.verify(&format!("{forged}.{sig}")), Err(AuthError::InvalidToken));
        assert_eq!(tokens.verify(payload), Err(AuthError::InvalidToken));
        assert_eq!(tokens.verify("garbage"), Err(AuthError::InvalidToken));
    }
}
