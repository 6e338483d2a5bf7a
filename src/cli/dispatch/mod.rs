use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, auth, jobs, mail, social};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let db_max_connections = matches
        .get_one::<u32>(commands::ARG_DB_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(10);

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections,
        auth: auth::Options::parse(matches)?,
        social: social::Options::parse(matches)?,
        mail: mail::Options::parse(matches),
        jobs: jobs::Options::parse(matches),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("GGWP_DSN", Some("postgres://localhost:5432/ggwp")),
                ("GGWP_PORT", Some("9090")),
                ("GGWP_TOKEN_SECRET", Some("s3cr3t")),
                ("GGWP_FACEBOOK_APP_ID", None::<&str>),
                ("GGWP_FACEBOOK_APP_SECRET", None::<&str>),
                ("GGWP_TWITTER_CONSUMER_KEY", None::<&str>),
                ("GGWP_TWITTER_CONSUMER_SECRET", None::<&str>),
                ("GGWP_SMTP_HOST", None::<&str>),
                ("GGWP_JOBS_DISABLED", None::<&str>),
                ("GGWP_JOB_PASS_TIMEOUT_SECONDS", Some("120")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["ggwp"]);
                let action = handler(&matches);
                assert!(action.is_ok());

                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 9090);
                    assert_eq!(args.dsn, "postgres://localhost:5432/ggwp");
                    assert_eq!(args.auth.token_secret.expose_secret(), "s3cr3t");
                    assert!(args.social.facebook.is_none());
                    assert!(args.mail.smtp_host.is_none());
                    assert!(!args.jobs.disabled);
                    assert_eq!(args.jobs.pass_timeout_seconds, 120);
                }
            },
        );
    }

    #[test]
    fn missing_token_secret_is_an_error() {
        temp_env::with_vars(
            [
                ("GGWP_DSN", Some("postgres://localhost:5432/ggwp")),
                ("GGWP_TOKEN_SECRET", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["ggwp"]);
                assert!(handler(&matches).is_err());
            },
        );
    }

    #[test]
    fn half_configured_provider_is_an_error() {
        temp_env::with_vars(
            [
                ("GGWP_DSN", Some("postgres://localhost:5432/ggwp")),
                ("GGWP_TOKEN_SECRET", Some("s3cr3t")),
                ("GGWP_FACEBOOK_APP_ID", Some("1234")),
                ("GGWP_FACEBOOK_APP_SECRET", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["ggwp"]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
