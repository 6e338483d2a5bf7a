use crate::api::{
    self,
    jobs::JobsConfig,
    mailer::{LogMailer, Mailer, SmtpMailer},
    social::{facebook::FacebookClient, twitter::TwitterClient, SocialProviders},
    state::AuthConfig,
    tokens::TokenService,
    ServerConfig,
};
use crate::cli::commands::{auth, jobs, mail, social};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub auth: auth::Options,
    pub social: social::Options,
    pub mail: mail::Options,
    pub jobs: jobs::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let tokens = TokenService::new(
        &args.auth.token_secret,
        token_ttl(args.auth.access_token_ttl_seconds)?,
        token_ttl(args.auth.refresh_token_ttl_seconds)?,
    )
    .context("Failed to configure token signing")?;

    let auth_config = AuthConfig::new()
        .with_bcrypt_cost(args.auth.bcrypt_cost)
        .with_reset_ttl_seconds(args.auth.reset_token_ttl_seconds)
        .with_mail_timeout_seconds(args.mail.timeout_seconds);

    let providers = social_providers(args.social)?;
    let mailer = mailer(args.mail)?;
    let jobs = jobs_config(&args.jobs);

    api::new(ServerConfig {
        port: args.port,
        dsn: args.dsn,
        db_max_connections: args.db_max_connections,
        tokens,
        auth: auth_config,
        social: providers,
        mailer,
        jobs,
    })
    .await
}

fn token_ttl(seconds: u64) -> Result<chrono::Duration> {
    let seconds = i64::try_from(seconds).context("token ttl is out of range")?;
    Ok(chrono::Duration::seconds(seconds))
}

fn social_providers(options: social::Options) -> Result<SocialProviders> {
    let timeout = Duration::from_secs(options.timeout_seconds);
    let mut providers = SocialProviders::new();

    if let Some((app_id, app_secret)) = options.facebook {
        let client = FacebookClient::new(&options.facebook_graph_url, app_id, app_secret, timeout)?;
        providers = providers.with_facebook(Arc::new(client));
    } else {
        info!("Facebook credentials not set, Facebook login disabled");
    }

    if let Some((consumer_key, consumer_secret)) = options.twitter {
        let client = TwitterClient::new(
            &options.twitter_api_url,
            consumer_key,
            consumer_secret,
            timeout,
        )?;
        providers = providers.with_twitter(Arc::new(client));
    } else {
        info!("Twitter credentials not set, Twitter login disabled");
    }

    Ok(providers)
}

fn mailer(options: mail::Options) -> Result<Arc<dyn Mailer>> {
    let Some(host) = options.smtp_host else {
        warn!("SMTP host not set, emails will only be logged");
        return Ok(Arc::new(LogMailer));
    };

    let credentials = options.smtp_username.zip(options.smtp_password);
    let mailer = SmtpMailer::new(
        &host,
        options.smtp_port,
        credentials,
        &options.sender,
        Duration::from_secs(options.timeout_seconds),
    )?;

    Ok(Arc::new(mailer))
}

fn jobs_config(options: &jobs::Options) -> Option<JobsConfig> {
    if options.disabled {
        info!("Background jobs disabled");
        return None;
    }

    Some(
        JobsConfig::new()
            .with_referral_backfill_seconds(options.referral_backfill_seconds)
            .with_waitlist_backfill_seconds(options.waitlist_backfill_seconds)
            .with_waitlist_email_seconds(options.waitlist_email_seconds)
            .with_outbox_poll_seconds(options.outbox_poll_seconds)
            .with_outbox_send_timeout_seconds(options.outbox_send_timeout_seconds)
            .with_pass_timeout_seconds(options.pass_timeout_seconds),
    )
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("db_max_connections", args.db_max_connections.to_string()),
        (
            "access_token_ttl",
            format!("{}s", args.auth.access_token_ttl_seconds),
        ),
        (
            "refresh_token_ttl",
            format!("{}s", args.auth.refresh_token_ttl_seconds),
        ),
        ("facebook", args.social.facebook.is_some().to_string()),
        ("twitter", args.social.twitter.is_some().to_string()),
        (
            "smtp_host",
            args.mail
                .smtp_host
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("jobs", (!args.jobs.disabled).to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "ggwp {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
