use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_MAIL_SENDER: &str = "mail-sender";
pub const ARG_MAIL_TIMEOUT_SECONDS: &str = "mail-timeout-seconds";

#[derive(Debug)]
pub struct Options {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<SecretString>,
    pub sender: String,
    pub timeout_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            smtp_host: get_non_empty(ARG_SMTP_HOST),
            smtp_port: matches
                .get_one::<u16>(ARG_SMTP_PORT)
                .copied()
                .unwrap_or(587),
            smtp_username: get_non_empty(ARG_SMTP_USERNAME),
            smtp_password: get_non_empty(ARG_SMTP_PASSWORD).map(SecretString::from),
            sender: get_non_empty(ARG_MAIL_SENDER)
                .unwrap_or_else(|| "noreply@ggwpacademy.com".to_string()),
            timeout_seconds: matches
                .get_one::<u64>(ARG_MAIL_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(30),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host; emails are only logged when unset")
                .env("GGWP_SMTP_HOST"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port (STARTTLS)")
                .env("GGWP_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username")
                .env("GGWP_SMTP_USERNAME"),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("GGWP_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MAIL_SENDER)
                .long(ARG_MAIL_SENDER)
                .help("From address for outgoing email")
                .env("GGWP_MAIL_SENDER")
                .default_value("noreply@ggwpacademy.com"),
        )
        .arg(
            Arg::new(ARG_MAIL_TIMEOUT_SECONDS)
                .long(ARG_MAIL_TIMEOUT_SECONDS)
                .help("Timeout for request-path email delivery in seconds")
                .env("GGWP_MAIL_TIMEOUT_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
}
