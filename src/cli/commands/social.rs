use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FACEBOOK_APP_ID: &str = "facebook-app-id";
pub const ARG_FACEBOOK_APP_SECRET: &str = "facebook-app-secret";
pub const ARG_FACEBOOK_GRAPH_URL: &str = "facebook-graph-url";
pub const ARG_TWITTER_CONSUMER_KEY: &str = "twitter-consumer-key";
pub const ARG_TWITTER_CONSUMER_SECRET: &str = "twitter-consumer-secret";
pub const ARG_TWITTER_API_URL: &str = "twitter-api-url";
pub const ARG_SOCIAL_TIMEOUT_SECONDS: &str = "social-timeout-seconds";

#[derive(Debug)]
pub struct Options {
    pub facebook: Option<(String, SecretString)>,
    pub facebook_graph_url: String,
    pub twitter: Option<(String, SecretString)>,
    pub twitter_api_url: String,
    pub timeout_seconds: u64,
}

impl Options {
    /// Parse social provider credentials. A provider is only configured when
    /// both its id and its secret are present.
    ///
    /// # Errors
    /// Returns an error if only one half of a provider credential pair is set.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let facebook = pair(
            get_non_empty(ARG_FACEBOOK_APP_ID),
            get_non_empty(ARG_FACEBOOK_APP_SECRET),
            ARG_FACEBOOK_APP_ID,
            ARG_FACEBOOK_APP_SECRET,
        )?;
        let twitter = pair(
            get_non_empty(ARG_TWITTER_CONSUMER_KEY),
            get_non_empty(ARG_TWITTER_CONSUMER_SECRET),
            ARG_TWITTER_CONSUMER_KEY,
            ARG_TWITTER_CONSUMER_SECRET,
        )?;

        Ok(Self {
            facebook,
            facebook_graph_url: get_non_empty(ARG_FACEBOOK_GRAPH_URL)
                .unwrap_or_else(|| "https://graph.facebook.com".to_string()),
            twitter,
            twitter_api_url: get_non_empty(ARG_TWITTER_API_URL)
                .unwrap_or_else(|| "https://api.twitter.com".to_string()),
            timeout_seconds: matches
                .get_one::<u64>(ARG_SOCIAL_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        })
    }
}

fn pair(
    id: Option<String>,
    secret: Option<String>,
    id_arg: &str,
    secret_arg: &str,
) -> anyhow::Result<Option<(String, SecretString)>> {
    match (id, secret) {
        (Some(id), Some(secret)) => Ok(Some((id, SecretString::from(secret)))),
        (None, None) => Ok(None),
        (Some(_), None) => anyhow::bail!("--{id_arg} requires --{secret_arg}"),
        (None, Some(_)) => anyhow::bail!("--{secret_arg} requires --{id_arg}"),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FACEBOOK_APP_ID)
                .long(ARG_FACEBOOK_APP_ID)
                .help("Facebook application id used to validate user tokens")
                .env("GGWP_FACEBOOK_APP_ID"),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_APP_SECRET)
                .long(ARG_FACEBOOK_APP_SECRET)
                .help("Facebook application secret")
                .env("GGWP_FACEBOOK_APP_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_GRAPH_URL)
                .long(ARG_FACEBOOK_GRAPH_URL)
                .help("Facebook Graph API base URL")
                .env("GGWP_FACEBOOK_GRAPH_URL")
                .default_value("https://graph.facebook.com"),
        )
        .arg(
            Arg::new(ARG_TWITTER_CONSUMER_KEY)
                .long(ARG_TWITTER_CONSUMER_KEY)
                .help("Twitter consumer key used to sign OAuth 1.0a requests")
                .env("GGWP_TWITTER_CONSUMER_KEY"),
        )
        .arg(
            Arg::new(ARG_TWITTER_CONSUMER_SECRET)
                .long(ARG_TWITTER_CONSUMER_SECRET)
                .help("Twitter consumer secret")
                .env("GGWP_TWITTER_CONSUMER_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TWITTER_API_URL)
                .long(ARG_TWITTER_API_URL)
                .help("Twitter API base URL")
                .env("GGWP_TWITTER_API_URL")
                .default_value("https://api.twitter.com"),
        )
        .arg(
            Arg::new(ARG_SOCIAL_TIMEOUT_SECONDS)
                .long(ARG_SOCIAL_TIMEOUT_SECONDS)
                .help("Timeout for social provider requests in seconds")
                .env("GGWP_SOCIAL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
