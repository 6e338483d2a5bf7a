//! Facebook Graph API client.
//!
//! The user token is first inspected through `debug_token` with the app token
//! (`app_id|app_secret`). Only a valid token issued to this app is used to read
//! the profile from `/me`.

use super::{ProviderError, SocialAssertion, SocialProfile, SocialVerifier};
use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};
use url::Url;

const PROVIDER: &str = "facebook";
const PROFILE_FIELDS: &str = "email,first_name,last_name";

pub struct FacebookClient {
    http: Client,
    graph_url: Url,
    app_id: String,
    app_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct DebugTokenResponse {
    data: DebugTokenData,
}

#[derive(Debug, Deserialize)]
struct DebugTokenData {
    #[serde(default)]
    is_valid: bool,
    #[serde(default)]
    app_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl FacebookClient {
    /// # Errors
    /// Returns an error if the Graph URL is invalid or the HTTP client cannot be built.
    pub fn new(
        graph_url: &str,
        app_id: String,
        app_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let graph_url = Url::parse(graph_url)
            .with_context(|| format!("invalid Facebook Graph URL: {graph_url}"))?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build Facebook HTTP client")?;

        Ok(Self {
            http,
            graph_url,
            app_id,
            app_secret,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.graph_url.as_str().trim_end_matches('/'))
    }

    async fn validate(&self, access_token: &str) -> Result<(), ProviderError> {
        let app_token = format!("{}|{}", self.app_id, self.app_secret.expose_secret());
        let response = self
            .http
            .get(self.endpoint("debug_token"))
            .query(&[("input_token", access_token), ("access_token", app_token.as_str())])
            .send()
            .instrument(info_span!("facebook.debug_token"))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: response.status().as_u16(),
            });
        }

        let inspected: DebugTokenResponse = response.json().await?;
        let issued_to_app = inspected
            .data
            .app_id
            .as_deref()
            .map_or(true, |app_id| app_id == self.app_id);

        if inspected.data.is_valid && issued_to_app {
            Ok(())
        } else {
            debug!(
                is_valid = inspected.data.is_valid,
                issued_to_app, "Facebook token rejected"
            );
            Err(ProviderError::InvalidToken)
        }
    }

    async fn profile(&self, access_token: &str) -> Result<SocialProfile, ProviderError> {
        let response = self
            .http
            .get(self.endpoint("me"))
            .query(&[("fields", PROFILE_FIELDS), ("access_token", access_token)])
            .send()
            .instrument(info_span!("facebook.me"))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: response.status().as_u16(),
            });
        }

        let me: MeResponse = response.json().await?;
        let email = me
            .email
            .filter(|email| !email.is_empty())
            .ok_or(ProviderError::MissingEmail(PROVIDER))?;

        Ok(SocialProfile {
            email,
            first_name: me.first_name.unwrap_or_default(),
            last_name: me.last_name.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl SocialVerifier for FacebookClient {
    async fn verify_assertion(
        &self,
        assertion: &SocialAssertion,
    ) -> Result<SocialProfile, ProviderError> {
        let SocialAssertion::Facebook { access_token } = assertion else {
            return Err(ProviderError::WrongNetwork {
                provider: PROVIDER,
                network: assertion.network(),
            });
        };

        self.validate(access_token).await?;
        self.profile(access_token).await
    }
}
