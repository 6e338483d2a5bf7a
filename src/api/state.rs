//! Shared handler state and the knobs that shape the account flows.

use crate::api::mailer::Mailer;
use crate::api::social::SocialProviders;
use crate::api::store::Store;
use crate::api::tokens::TokenService;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BCRYPT_COST: u32 = 10;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;
const DEFAULT_RESET_TTL_SECONDS: u64 = 600;
const DEFAULT_MAIL_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    bcrypt_cost: u32,
    reset_ttl_seconds: u64,
    mail_timeout_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            mail_timeout_seconds: DEFAULT_MAIL_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: u64) -> Self {
        self.reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mail_timeout_seconds(mut self, seconds: u64) -> Self {
        self.mail_timeout_seconds = seconds;
        self
    }

    /// Keep bcrypt inside its valid range and replace zero durations.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        self.bcrypt_cost = self.bcrypt_cost.clamp(MIN_BCRYPT_COST, MAX_BCRYPT_COST);
        if self.reset_ttl_seconds == 0 {
            self.reset_ttl_seconds = DEFAULT_RESET_TTL_SECONDS;
        }
        if self.mail_timeout_seconds == 0 {
            self.mail_timeout_seconds = DEFAULT_MAIL_TIMEOUT_SECONDS;
        }
        self
    }

    #[must_use]
    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    #[must_use]
    pub fn reset_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.reset_ttl_seconds).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_seconds)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a handler needs, shared behind an `Arc` extension.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: TokenService,
    pub auth: AuthConfig,
    pub social: SocialProviders,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        auth: AuthConfig,
        social: SocialProviders,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            tokens,
            auth: auth.normalize(),
            social,
            mailer,
        }
    }
}
