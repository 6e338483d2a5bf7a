//! Account creation and social login.

use super::{hash_password, normalize_email, valid_email};
use crate::api::codes::{create_referral_code, validate_referral_code};
use crate::api::effects::non_critical;
use crate::api::error::ApiError;
use crate::api::models::{NewAccount, ReferralCode, User};
use crate::api::social::{SocialAssertion, SocialProviders};
use crate::api::store::{CreateUserOutcome, NewUser, Store, Transaction};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::ToSchema;

pub const EMAIL_EXISTS: &str = "email exists, please login instead";
pub const SOCIAL_EMAIL_EXISTS: &str = "associated user email already exists, please login instead";

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PasswordSignup {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl PasswordSignup {
    /// # Errors
    /// `missing attribute: <field>` for the first blank required field, then the
    /// e-mail shape check.
    pub fn validate(&self) -> Result<(), ApiError> {
        let required = [
            ("email", &self.email),
            ("password", &self.password),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ApiError::invalid(format!("missing attribute: {field}")));
        }
        if !valid_email(&normalize_email(&self.email)) {
            return Err(ApiError::invalid("invalid email address"));
        }
        Ok(())
    }
}

async fn create_account(
    tx: &mut dyn Transaction,
    user: &NewUser,
    conflict_message: &str,
) -> Result<(User, ReferralCode), ApiError> {
    let created = match tx.create_user(user).await.context("creating player")? {
        CreateUserOutcome::Created(created) => created,
        CreateUserOutcome::Conflict => return Err(ApiError::Conflict(conflict_message.to_string())),
    };

    let referral_code = create_referral_code(tx, created.id).await?;

    Ok((created, referral_code))
}

async fn link_waitlist(tx: &mut dyn Transaction, user: &User) {
    non_critical("link_waitlist_user", tx.link_waitlist_user(user.id, &user.email)).await;
}

/// Password sign-up with an optional referral code.
///
/// # Errors
/// `InvalidInput` for missing fields or a rejected referral code, `Conflict`
/// when the e-mail is taken, `Internal` for store failures.
pub async fn sign_up(
    store: &dyn Store,
    request: &PasswordSignup,
    bcrypt_cost: u32,
    now: DateTime<Utc>,
) -> Result<NewAccount, ApiError> {
    request.validate()?;

    let email = normalize_email(&request.email);
    let password_hash = hash_password(&request.password, bcrypt_cost).await?;

    let mut tx = store.begin().await.context("begin tx")?;

    if tx
        .user_by_email(&email)
        .await
        .context("checking user by email")?
        .is_some()
    {
        return Err(ApiError::Conflict(EMAIL_EXISTS.to_string()));
    }

    let referral = match request
        .referral_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
    {
        Some(code) => Some(validate_referral_code(tx.as_mut(), code, now).await?),
        None => None,
    };

    let new_user = NewUser {
        email,
        password_hash,
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
    };
    let (user, referral_code) = create_account(tx.as_mut(), &new_user, EMAIL_EXISTS).await?;

    if let Some(referral) = referral {
        tx.insert_referral_redemption(referral.id, user.id)
            .await
            .context("recording referral redemption")?;
    }

    link_waitlist(tx.as_mut(), &user).await;

    tx.commit().await.context("committing user sign up tx")?;

    info!(user_id = user.id, "User signed up");

    Ok(NewAccount {
        user,
        referral_code,
    })
}

/// Create an account from a verified social profile.
///
/// The password hash is derived from the e-mail so the column is never empty;
/// social accounts log in through their provider.
///
/// # Errors
/// `Conflict` when the e-mail already has an account, `Upstream` when the
/// provider rejects the assertion, `Internal` for store failures.
pub async fn social_sign_up(
    store: &dyn Store,
    providers: &SocialProviders,
    assertion: &SocialAssertion,
    bcrypt_cost: u32,
) -> Result<NewAccount, ApiError> {
    let profile = providers.verify(assertion).await?;
    let email = normalize_email(&profile.email);
    let password_hash = hash_password(&email, bcrypt_cost).await?;

    let mut tx = store.begin().await.context("begin tx")?;

    if tx
        .user_by_email(&email)
        .await
        .context("checking user by email")?
        .is_some()
    {
        debug!(network = %assertion.network(), "Social sign-up for an existing account");
        return Err(ApiError::Conflict(SOCIAL_EMAIL_EXISTS.to_string()));
    }

    let new_user = NewUser {
        email,
        password_hash,
        first_name: profile.first_name,
        last_name: profile.last_name,
    };
    let (user, referral_code) = create_account(tx.as_mut(), &new_user, SOCIAL_EMAIL_EXISTS).await?;

    tx.insert_social_token(user.id, &assertion.credentials())
        .await
        .context("inserting social token")?;

    link_waitlist(tx.as_mut(), &user).await;

    tx.commit().await.context("committing social sign up tx")?;

    info!(user_id = user.id, network = %assertion.network(), "User signed up");

    Ok(NewAccount {
        user,
        referral_code,
    })
}

/// Log in with a verified social profile and store the fresh provider token.
///
/// # Errors
/// `InvalidInput` when no account uses the profile's e-mail.
pub async fn social_login(
    store: &dyn Store,
    providers: &SocialProviders,
    assertion: &SocialAssertion,
) -> Result<User, ApiError> {
    let profile = providers.verify(assertion).await?;
    let email = normalize_email(&profile.email);

    let mut tx = store.begin().await.context("begin tx")?;

    let user = tx
        .user_by_email(&email)
        .await
        .context("getting user by email")?
        .ok_or_else(|| {
            ApiError::invalid(format!(
                "unknown email address: {email}, please sign up with {} instead",
                assertion.network()
            ))
        })?;

    tx.update_social_token(user.id, &assertion.credentials())
        .await
        .context("updating social token")?;

    tx.commit().await.context("committing social login tx")?;

    Ok(user)
}
