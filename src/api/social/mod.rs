//! Social identity providers.
//!
//! A client submits a provider access token (and for Twitter the matching
//! secret). The assertion is verified against the provider, which hands back the
//! e-mail address and display name used to log in or to create an account.

pub mod facebook;
pub mod twitter;

use crate::api::error::ApiError;
use crate::api::models::SocialNetwork;
use crate::api::store::SocialCredentials;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Provider credentials submitted by the client, one variant per supported network.
#[derive(Clone, PartialEq, Eq)]
pub enum SocialAssertion {
    Facebook {
        access_token: String,
    },
    Twitter {
        access_token: String,
        access_secret: String,
    },
}

impl std::fmt::Debug for SocialAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialAssertion")
            .field("network", &self.network())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssertionError {
    #[error("{0} is currently not supported")]
    Unsupported(SocialNetwork),

    #[error("missing access token")]
    MissingToken,

    #[error("missing access secret")]
    MissingSecret,
}

impl SocialAssertion {
    /// # Errors
    /// `Unsupported` for networks without a provider client, `MissingToken` or
    /// `MissingSecret` when a required credential is blank.
    pub fn new(
        network: SocialNetwork,
        access_token: &str,
        access_secret: Option<&str>,
    ) -> Result<Self, AssertionError> {
        let access_token = access_token.trim();
        let access_secret = access_secret.map(str::trim).filter(|s| !s.is_empty());

        match network {
            SocialNetwork::Facebook | SocialNetwork::Twitter if access_token.is_empty() => {
                Err(AssertionError::MissingToken)
            }
            SocialNetwork::Facebook => Ok(Self::Facebook {
                access_token: access_token.to_string(),
            }),
            SocialNetwork::Twitter => {
                let access_secret = access_secret.ok_or(AssertionError::MissingSecret)?;
                Ok(Self::Twitter {
                    access_token: access_token.to_string(),
                    access_secret: access_secret.to_string(),
                })
            }
            SocialNetwork::Instagram | SocialNetwork::Twitch | SocialNetwork::Unknown => {
                Err(AssertionError::Unsupported(network))
            }
        }
    }

    #[must_use]
    pub const fn network(&self) -> SocialNetwork {
        match self {
            Self::Facebook { .. } => SocialNetwork::Facebook,
            Self::Twitter { .. } => SocialNetwork::Twitter,
        }
    }

    /// Row written to the social token table.
    #[must_use]
    pub fn credentials(&self) -> SocialCredentials {
        match self {
            Self::Facebook { access_token } => SocialCredentials {
                network: SocialNetwork::Facebook,
                access_token: access_token.clone(),
                access_secret: None,
            },
            Self::Twitter {
                access_token,
                access_secret,
            } => SocialCredentials {
                network: SocialNetwork::Twitter,
                access_token: access_token.clone(),
                access_secret: Some(access_secret.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("access token is not valid")]
    InvalidToken,

    #[error("non 200 code from {provider} got {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{0} did not return an email address")]
    MissingEmail(&'static str),

    #[error("{provider} cannot verify {network} credentials")]
    WrongNetwork {
        provider: &'static str,
        network: SocialNetwork,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Resolve a social assertion into the profile of the account behind it.
#[async_trait]
pub trait SocialVerifier: Send + Sync {
    async fn verify_assertion(
        &self,
        assertion: &SocialAssertion,
    ) -> Result<SocialProfile, ProviderError>;
}

/// The configured provider clients. A network without credentials stays `None`.
#[derive(Clone, Default)]
pub struct SocialProviders {
    facebook: Option<Arc<dyn SocialVerifier>>,
    twitter: Option<Arc<dyn SocialVerifier>>,
}

impl SocialProviders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_facebook(mut self, verifier: Arc<dyn SocialVerifier>) -> Self {
        self.facebook = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_twitter(mut self, verifier: Arc<dyn SocialVerifier>) -> Self {
        self.twitter = Some(verifier);
        self
    }

    /// # Errors
    /// `Unimplemented` when the network has no configured client, `Upstream`
    /// when the provider rejects the credentials or cannot be reached.
    pub async fn verify(&self, assertion: &SocialAssertion) -> Result<SocialProfile, ApiError> {
        let network = assertion.network();
        let verifier = match network {
            SocialNetwork::Facebook => self.facebook.as_ref(),
            SocialNetwork::Twitter => self.twitter.as_ref(),
            _ => None,
        }
        .ok_or_else(|| ApiError::Unimplemented(format!("{network} login is not configured")))?;

        verifier.verify_assertion(assertion).await.map_err(|err| {
            debug!(network = %network, "Social assertion rejected: {}", err);
            match err {
                ProviderError::InvalidToken => {
                    ApiError::Upstream(format!("validating access token: {err}"))
                }
                other => ApiError::Upstream(format!(
                    "getting user details from {}: {other}",
                    network.as_str().to_lowercase()
                )),
            }
        })
    }
}

/// Fixed-answer verifier for tests.
#[cfg(test)]
pub struct StaticVerifier {
    pub profile: Option<SocialProfile>,
}

#[cfg(test)]
#[async_trait]
impl SocialVerifier for StaticVerifier {
    async fn verify_assertion(
        &self,
        _assertion: &SocialAssertion,
    ) -> Result<SocialProfile, ProviderError> {
        self.profile.clone().ok_or(ProviderError::InvalidToken)
    }
}
