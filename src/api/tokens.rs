//! Stateless access and refresh tokens (HS256).
//!
//! Access tokens carry `{user_id, user_type, iat, exp}` and live for minutes.
//! Refresh tokens carry `{userID, iat, exp}` and live for weeks. The two claim
//! sets are disjoint, so a token of one kind never decodes as the other.
//! Expiry is checked against an explicit clock so the window is testable.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("token signing secret must not be empty")]
    EmptySecret,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: i64,
    pub user_type: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// # Errors
    /// Returns `TokenError::EmptySecret` for a blank signing secret.
    pub fn new(
        secret: &SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, TokenError> {
        let secret = secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(TokenError::EmptySecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue_access(&self, user_id: i64, user_type: &str) -> Result<IssuedToken, TokenError> {
        self.issue_access_at(user_id, user_type, Utc::now())
    }

    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue_access_at(
        &self,
        user_id: i64,
        user_type: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            user_id,
            user_type: user_type.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        self.sign(&claims, expires_at)
    }

    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue_refresh(&self, user_id: i64) -> Result<IssuedToken, TokenError> {
        self.issue_refresh_at(user_id, Utc::now())
    }

    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue_refresh_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now + self.refresh_ttl;
        let claims = RefreshClaims {
            user_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        self.sign(&claims, expires_at)
    }

    /// # Errors
    /// `Invalid` for bad signatures, malformed input or refresh tokens;
    /// `Expired` once `now` is past `exp`.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify_access_at(token, Utc::now())
    }

    /// # Errors
    /// See [`TokenService::verify_access`].
    pub fn verify_access_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token)?;
        check_expiry(claims.exp, now)?;
        Ok(claims)
    }

    /// # Errors
    /// `Invalid` for bad signatures, malformed input or access tokens;
    /// `Expired` once `now` is past `exp`.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify_refresh_at(token, Utc::now())
    }

    /// # Errors
    /// See [`TokenService::verify_refresh`].
    pub fn verify_refresh_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode(token)?;
        check_expiry(claims.exp, now)?;
        Ok(claims)
    }

    fn sign<T: Serialize>(
        &self,
        claims: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| TokenError::Signing(err.to_string()))?;
        Ok(IssuedToken { token, expires_at })
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, token: &str) -> Result<T, TokenError> {
        decode::<T>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }
}

fn check_expiry(exp: i64, now: DateTime<Utc>) -> Result<(), TokenError> {
    if now.timestamp() > exp {
        Err(TokenError::Expired)
    } else {
        Ok(())
    }
}
