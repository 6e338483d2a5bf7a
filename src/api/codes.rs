//! Random fixed-pattern codes: referral codes, waitlist codes and reset tokens.

use crate::api::error::ApiError;
use crate::api::models::{ReferralCode, ReferralType};
use crate::api::store::Transaction;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use thiserror::Error;

pub const DIGIT_PLACEHOLDER: char = '#';
pub const CODE_PATTERN: &str = "######";
pub const REFERRAL_PREFIX: &str = "WELC-";
pub const WAITLIST_PREFIX: &str = "WAIT-";
pub const REFERRAL_REDEMPTION_CAP: i32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("code pattern must not be empty")]
    EmptyPattern,

    #[error("code pattern {0:?} has no digit placeholder")]
    NoPlaceholder(String),
}

/// Build one code: `prefix` followed by `pattern` with each `#` replaced by a
/// random digit.
///
/// # Errors
/// Returns `CodeError` when the pattern is empty or has nothing to randomize.
pub fn generate_code(prefix: &str, pattern: &str) -> Result<String, CodeError> {
    if pattern.is_empty() {
        return Err(CodeError::EmptyPattern);
    }
    if !pattern.contains(DIGIT_PLACEHOLDER) {
        return Err(CodeError::NoPlaceholder(pattern.to_string()));
    }

    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(prefix.len() + pattern.len());
    code.push_str(prefix);
    for c in pattern.chars() {
        if c == DIGIT_PLACEHOLDER {
            code.push(char::from(b'0' + rng.gen_range(0..10u8)));
        } else {
            code.push(c);
        }
    }

    Ok(code)
}

/// # Errors
/// Propagates `CodeError` from [`generate_code`].
pub fn referral_code() -> Result<String, CodeError> {
    generate_code(REFERRAL_PREFIX, CODE_PATTERN)
}

/// # Errors
/// Propagates `CodeError` from [`generate_code`].
pub fn waitlist_code() -> Result<String, CodeError> {
    generate_code(WAITLIST_PREFIX, CODE_PATTERN)
}

/// # Errors
/// Propagates `CodeError` from [`generate_code`].
pub fn reset_token() -> Result<String, CodeError> {
    generate_code("", CODE_PATTERN)
}

/// Generate and store the referral code of a new user.
///
/// # Errors
/// Returns an error if generation or the insert fails.
pub async fn create_referral_code(
    tx: &mut dyn Transaction,
    user_id: i64,
) -> anyhow::Result<ReferralCode> {
    let code = referral_code()?;
    tx.create_referral_code(
        user_id,
        &code,
        ReferralType::Quantity,
        REFERRAL_REDEMPTION_CAP,
    )
    .await
    .with_context(|| format!("unable to save referral code: {code}"))
}

/// Generate and store the owner code of a waitlist entry.
///
/// # Errors
/// Returns an error if generation or the update fails.
pub async fn assign_waitlist_code(tx: &mut dyn Transaction, email: &str) -> anyhow::Result<()> {
    let code = waitlist_code()?;
    tx.set_waitlist_code(email, &code)
        .await
        .context("updating waitlist item")
}

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("unknown referral code used: {0}")]
    Unknown(String),

    #[error("referral code {0:?} is expired")]
    Expired(String),

    #[error("referral code {0:?} is at capacity")]
    AtCapacity(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<ReferralError> for ApiError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::Store(err) => Self::Internal(err),
            other => Self::invalid(other.to_string()),
        }
    }
}

/// Pure admission check for a referral code given its redemption count.
///
/// # Errors
/// `Expired` for an HOURS code past `created_at + value` hours, `AtCapacity`
/// for a QUANTITY code with `redemptions >= value`.
pub fn check_referral(
    code: &ReferralCode,
    redemptions: i64,
    now: DateTime<Utc>,
) -> Result<(), ReferralError> {
    match code.referral_type {
        ReferralType::Hours => {
            if now > code.created_at + Duration::hours(i64::from(code.value)) {
                return Err(ReferralError::Expired(code.referral_code.clone()));
            }
        }
        ReferralType::Quantity => {
            if redemptions >= i64::from(code.value) {
                return Err(ReferralError::AtCapacity(code.referral_code.clone()));
            }
        }
    }
    Ok(())
}

/// Resolve a referral code and make sure it can still be redeemed.
///
/// # Errors
/// See [`ReferralError`].
pub async fn validate_referral_code(
    tx: &mut dyn Transaction,
    code: &str,
    now: DateTime<Utc>,
) -> Result<ReferralCode, ReferralError> {
    let referral = tx
        .referral_code_by_code(code)
        .await
        .with_context(|| format!("unable to get referral code: {code}"))?
        .ok_or_else(|| ReferralError::Unknown(code.to_string()))?;

    let redemptions = match referral.referral_type {
        ReferralType::Quantity => tx
            .referral_redemptions(referral.id)
            .await
            .context("unable to get total redemptions for code")?,
        ReferralType::Hours => 0,
    };

    check_referral(&referral, redemptions, now)?;

    Ok(referral)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn codes_follow_their_pattern() {
        let referral = Regex::new(r"^WELC-\d{6}$").unwrap();
        let waitlist = Regex::new(r"^WAIT-\d{6}$").unwrap();
        let reset = Regex::new(r"^\d{6}$").unwrap();

        for _ in 0..50 {
            assert!(referral.is_match(&referral_code().unwrap()));
            assert!(waitlist.is_match(&waitlist_code().unwrap()));
            assert!(reset.is_match(&reset_token().unwrap()));
        }
    }

    #[test]
    fn literal_characters_are_kept() {
        let code = generate_code("X", "##-AB").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.starts_with('X'));
        assert!(code.ends_with("-AB"));
    }

    #[test]
    fn invalid_patterns() {
        assert_eq!(generate_code("WELC-", ""), Err(CodeError::EmptyPattern));
        assert_eq!(
            generate_code("WELC-", "ABC"),
            Err(CodeError::NoPlaceholder("ABC".to_string()))
        );
    }

    fn code(referral_type: ReferralType, value: i32, created_at: DateTime<Utc>) -> ReferralCode {
        ReferralCode {
            id: 1,
            user_id: 1,
            referral_code: "WELC-000001".to_string(),
            referral_type,
            value,
            is_active: true,
            created_at,
        }
    }

    #[test]
    fn quantity_codes_have_a_cap() {
        let now = Utc::now();
        let referral = code(ReferralType::Quantity, 2, now);
        assert!(check_referral(&referral, 1, now).is_ok());
        let err = check_referral(&referral, 2, now).unwrap_err();
        assert_eq!(
            err.to_string(),
            "referral code \"WELC-000001\" is at capacity"
        );
    }

    #[test]
    fn hour_codes_expire() {
        let now = Utc::now();
        let referral = code(ReferralType::Hours, 24, now - Duration::hours(24));
        assert!(check_referral(&referral, 100, now).is_ok());
        let err = check_referral(&referral, 0, now + Duration::seconds(1)).unwrap_err();
        assert_eq!(err.to_string(), "referral code \"WELC-000001\" is expired");
    }
}
