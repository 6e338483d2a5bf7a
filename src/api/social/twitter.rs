//! Twitter client: OAuth 1.0a signed `account/verify_credentials`.

use super::{ProviderError, SocialAssertion, SocialProfile, SocialVerifier};
use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tracing::{info_span, Instrument};
use url::Url;

const PROVIDER: &str = "twitter";
const VERIFY_CREDENTIALS_PATH: &str = "1.1/account/verify_credentials.json";
const VERIFY_CREDENTIALS_QUERY: [(&str, &str); 3] = [
    ("include_email", "true"),
    ("include_entities", "true"),
    ("skip_status", "false"),
];

type HmacSha1 = Hmac<Sha1>;

pub struct TwitterClient {
    http: Client,
    api_url: Url,
    consumer_key: String,
    consumer_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: Option<String>,
}

/// Per-request OAuth values.
#[derive(Debug, Clone)]
pub struct OAuthParams<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: &'a str,
    pub token_secret: &'a str,
    pub nonce: &'a str,
    pub timestamp: i64,
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn oauth_fields<'a>(oauth: &'a OAuthParams<'a>, timestamp: &'a str) -> [(&'a str, &'a str); 6] {
    [
        ("oauth_consumer_key", oauth.consumer_key),
        ("oauth_nonce", oauth.nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", oauth.token),
        ("oauth_version", "1.0"),
    ]
}

/// HMAC-SHA1 signature over the normalized request (RFC 5849 section 3.4).
#[must_use]
pub fn signature(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    oauth: &OAuthParams<'_>,
) -> String {
    let timestamp = oauth.timestamp.to_string();

    let mut pairs: Vec<(String, String)> = params
        .iter()
        .chain(oauth_fields(oauth, &timestamp).iter())
        .map(|(key, value)| (encode(key), encode(value)))
        .collect();
    pairs.sort();

    let normalized = pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url),
        encode(&normalized)
    );
    let signing_key = format!(
        "{}&{}",
        encode(oauth.consumer_secret),
        encode(oauth.token_secret)
    );

    // HMAC accepts keys of any length.
    let mut mac = match HmacSha1::new_from_slice(signing_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(base_string.as_bytes());

    Base64::encode_string(&mac.finalize().into_bytes())
}

/// `Authorization` header value for a signed request.
#[must_use]
pub fn authorization_header(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    oauth: &OAuthParams<'_>,
) -> String {
    let signature = signature(method, base_url, params, oauth);
    let timestamp = oauth.timestamp.to_string();

    let mut fields: Vec<(&str, &str)> = oauth_fields(oauth, &timestamp).to_vec();
    fields.push(("oauth_signature", signature.as_str()));
    fields.sort_unstable();

    let rendered = fields
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {rendered}")
}

/// Split a display name on its last space: the trailing word is the last name.
/// A single word becomes the last name and the first name stays empty.
#[must_use]
pub fn split_name(name: &str) -> (String, String) {
    let parts: Vec<&str> = name.split(' ').collect();
    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => (rest.join(" "), (*last).to_string()),
        _ => (String::new(), name.to_string()),
    }
}

impl TwitterClient {
    /// # Errors
    /// Returns an error if the API URL is invalid or the HTTP client cannot be built.
    pub fn new(
        api_url: &str,
        consumer_key: String,
        consumer_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let api_url =
            Url::parse(api_url).with_context(|| format!("invalid Twitter API URL: {api_url}"))?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build Twitter HTTP client")?;

        Ok(Self {
            http,
            api_url,
            consumer_key,
            consumer_secret,
        })
    }

    async fn verify_credentials(
        &self,
        access_token: &str,
        access_secret: &str,
    ) -> Result<SocialProfile, ProviderError> {
        let url = format!(
            "{}/{VERIFY_CREDENTIALS_PATH}",
            self.api_url.as_str().trim_end_matches('/')
        );

        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let oauth = OAuthParams {
            consumer_key: &self.consumer_key,
            consumer_secret: self.consumer_secret.expose_secret(),
            token: access_token,
            token_secret: access_secret,
            nonce: &nonce,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let header = authorization_header("GET", &url, &VERIFY_CREDENTIALS_QUERY, &oauth);

        let response = self
            .http
            .get(&url)
            .query(&VERIFY_CREDENTIALS_QUERY)
            .header(AUTHORIZATION, header)
            .send()
            .instrument(info_span!("twitter.verify_credentials"))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: response.status().as_u16(),
            });
        }

        let user: TwitterUser = response.json().await?;
        let email = user
            .email
            .filter(|email| !email.is_empty())
            .ok_or(ProviderError::MissingEmail(PROVIDER))?;
        let (first_name, last_name) = split_name(&user.name);

        Ok(SocialProfile {
            email,
            first_name,
            last_name,
        })
    }
}

#[async_trait]
impl SocialVerifier for TwitterClient {
    async fn verify_assertion(
        &self,
        assertion: &SocialAssertion,
    ) -> Result<SocialProfile, ProviderError> {
        let SocialAssertion::Twitter {
            access_token,
            access_secret,
        } = assertion
        else {
            return Err(ProviderError::WrongNetwork {
                provider: PROVIDER,
                network: assertion.network(),
            });
        };

        self.verify_credentials(access_token, access_secret).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::get, Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn documented_request() -> OAuthParams<'static> {
        OAuthParams {
            consumer_key: "xvz1evFS4wEEPTGEFPHBog",
            consumer_secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            token: "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            token_secret: "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
            nonce: "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
            timestamp: 1_318_622_958,
        }
    }

    const STATUS_PARAMS: [(&str, &str); 2] = [
        ("include_entities", "true"),
        ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
    ];

    #[test]
    fn signature_matches_reference_request() {
        let signature = signature(
            "POST",
            "https://api.twitter.com/1.1/statuses/update.json",
            &STATUS_PARAMS,
            &documented_request(),
        );
        assert_eq!(signature, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
    }

    #[test]
    fn header_carries_encoded_signature() {
        let header = authorization_header(
            "POST",
            "https://api.twitter.com/1.1/statuses/update.json",
            &STATUS_PARAMS,
            &documented_request(),
        );
        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(header.contains("oauth_version=\"1.0\""));
    }

    #[test]
    fn name_split_on_last_space() {
        assert_eq!(
            split_name("Mary Ann Smith"),
            ("Mary Ann".to_string(), "Smith".to_string())
        );
        assert_eq!(
            split_name("Cher"),
            (String::new(), "Cher".to_string())
        );
        assert_eq!(split_name(""), (String::new(), String::new()));
    }

    async fn api_stub(status: axum::http::StatusCode) -> String {
        let app = Router::new().route(
            "/1.1/account/verify_credentials.json",
            get(move |headers: HeaderMap| async move {
                let signed = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains("oauth_token=\"user-token\""));
                let body: Value = json!({"name": "Grace Brewster Hopper", "email": "grace@ggwp.test"});
                if signed {
                    (status, Json(body))
                } else {
                    (axum::http::StatusCode::UNAUTHORIZED, Json(json!({})))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(api_url: &str) -> TwitterClient {
        TwitterClient::new(
            api_url,
            "consumer".to_string(),
            SecretString::from("consumer-secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn verified_credentials_resolve_profile() {
        let api = api_stub(axum::http::StatusCode::OK).await;
        let assertion = SocialAssertion::Twitter {
            access_token: "user-token".to_string(),
            access_secret: "user-secret".to_string(),
        };

        let profile = client(&api).verify_assertion(&assertion).await.unwrap();
        assert_eq!(profile.email, "grace@ggwp.test");
        assert_eq!(profile.first_name, "Grace Brewster");
        assert_eq!(profile.last_name, "Hopper");
    }

    #[tokio::test]
    async fn non_200_is_an_error() {
        let api = api_stub(axum::http::StatusCode::TOO_MANY_REQUESTS).await;
        let assertion = SocialAssertion::Twitter {
            access_token: "user-token".to_string(),
            access_secret: "user-secret".to_string(),
        };

        let err = client(&api).verify_assertion(&assertion).await.unwrap_err();
        assert_eq!(err.to_string(), "non 200 code from twitter got 429");
    }
}
