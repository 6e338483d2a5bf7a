//! Credential checks and account creation.
//!
//! Password login, password and social sign-up, social login and password
//! recovery. Every flow runs in one store transaction; a flow that fails before
//! commit leaves nothing behind.

pub mod recovery;
pub mod signup;

use crate::api::error::ApiError;
use crate::api::models::{SocialNetwork, User};
use crate::api::social::{AssertionError, SocialAssertion};
use crate::api::store::Transaction;
use anyhow::Context;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

pub const INVALID_CREDENTIALS: &str = "invalid password or email address";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unknown email address")]
    UnknownEmail,

    #[error("password mismatch")]
    Mismatch,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::UnknownEmail | CredentialError::Mismatch => {
                debug!("Login rejected: {}", err);
                Self::invalid(INVALID_CREDENTIALS)
            }
            CredentialError::Store(err) => Self::Internal(err),
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// bcrypt on the blocking pool.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task is cancelled.
pub async fn hash_password(password: &str, cost: u32) -> anyhow::Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("password hashing task failed")?
        .context("unable to generate hash for password")
}

/// # Errors
/// Returns an error for a malformed hash or a cancelled task.
pub async fn password_matches(candidate: &str, hash: &str) -> anyhow::Result<bool> {
    let candidate = candidate.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
        .await
        .context("password verification task failed")?
        .context("comparing password hash")
}

/// Resolve the account behind `email` and check `candidate` against its hash.
///
/// # Errors
/// `UnknownEmail` and `Mismatch` are kept apart for logging; callers collapse
/// them into one message.
pub async fn verify_password(
    tx: &mut dyn Transaction,
    email: &str,
    candidate: &str,
) -> Result<User, CredentialError> {
    let user = tx
        .user_by_email(&normalize_email(email))
        .await
        .context("getting user by email")?
        .ok_or(CredentialError::UnknownEmail)?;

    let Some(hash) = user.password_hash.as_deref().filter(|hash| !hash.is_empty()) else {
        return Err(CredentialError::Mismatch);
    };

    if password_matches(candidate, hash).await? {
        Ok(user)
    } else {
        Err(CredentialError::Mismatch)
    }
}

/// Which social flow an assertion is for; only used to word errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialFlow {
    Login,
    SignUp,
}

impl SocialFlow {
    const fn verb(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SignUp => "sign up",
        }
    }
}

/// Build an assertion from the raw query parameters.
///
/// # Errors
/// `InvalidInput` for unsupported networks or missing credentials.
pub fn social_assertion(
    flow: SocialFlow,
    network: SocialNetwork,
    access_token: &str,
    access_secret: Option<&str>,
) -> Result<SocialAssertion, ApiError> {
    SocialAssertion::new(network, access_token, access_secret).map_err(|err| match err {
        AssertionError::Unsupported(network) => ApiError::invalid(format!(
            "{} with {network} is currently not supported",
            flow.verb()
        )),
        other => ApiError::invalid(other.to_string()),
    })
}
