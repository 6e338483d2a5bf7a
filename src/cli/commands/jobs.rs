use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_JOBS_DISABLED: &str = "jobs-disabled";
pub const ARG_REFERRAL_BACKFILL_SECONDS: &str = "referral-backfill-seconds";
pub const ARG_WAITLIST_BACKFILL_SECONDS: &str = "waitlist-backfill-seconds";
pub const ARG_WAITLIST_EMAIL_SECONDS: &str = "waitlist-email-seconds";
pub const ARG_OUTBOX_POLL_SECONDS: &str = "outbox-poll-seconds";
pub const ARG_OUTBOX_SEND_TIMEOUT_SECONDS: &str = "outbox-send-timeout-seconds";
pub const ARG_JOB_PASS_TIMEOUT_SECONDS: &str = "job-pass-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub disabled: bool,
    pub referral_backfill_seconds: u64,
    pub waitlist_backfill_seconds: u64,
    pub waitlist_email_seconds: u64,
    pub outbox_poll_seconds: u64,
    pub outbox_send_timeout_seconds: u64,
    pub pass_timeout_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let seconds = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Self {
            disabled: matches.get_flag(ARG_JOBS_DISABLED),
            referral_backfill_seconds: seconds(ARG_REFERRAL_BACKFILL_SECONDS, 60),
            waitlist_backfill_seconds: seconds(ARG_WAITLIST_BACKFILL_SECONDS, 60),
            waitlist_email_seconds: seconds(ARG_WAITLIST_EMAIL_SECONDS, 300),
            outbox_poll_seconds: seconds(ARG_OUTBOX_POLL_SECONDS, 300),
            outbox_send_timeout_seconds: seconds(ARG_OUTBOX_SEND_TIMEOUT_SECONDS, 60),
            pass_timeout_seconds: seconds(ARG_JOB_PASS_TIMEOUT_SECONDS, 300),
        }
    }
}

fn seconds_arg(name: &'static str, help: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JOBS_DISABLED)
                .long(ARG_JOBS_DISABLED)
                .help("Do not start the background jobs on this instance")
                .env("GGWP_JOBS_DISABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(seconds_arg(
            ARG_REFERRAL_BACKFILL_SECONDS,
            "Interval between referral code backfill sweeps",
            "GGWP_REFERRAL_BACKFILL_SECONDS",
            "60",
        ))
        .arg(seconds_arg(
            ARG_WAITLIST_BACKFILL_SECONDS,
            "Interval between waitlist code backfill sweeps",
            "GGWP_WAITLIST_BACKFILL_SECONDS",
            "60",
        ))
        .arg(seconds_arg(
            ARG_WAITLIST_EMAIL_SECONDS,
            "Interval between waitlist email queueing sweeps",
            "GGWP_WAITLIST_EMAIL_SECONDS",
            "300",
        ))
        .arg(seconds_arg(
            ARG_OUTBOX_POLL_SECONDS,
            "Interval between email outbox deliveries",
            "GGWP_OUTBOX_POLL_SECONDS",
            "300",
        ))
        .arg(seconds_arg(
            ARG_OUTBOX_SEND_TIMEOUT_SECONDS,
            "Timeout for a single outbox email delivery",
            "GGWP_OUTBOX_SEND_TIMEOUT_SECONDS",
            "60",
        ))
        .arg(seconds_arg(
            ARG_JOB_PASS_TIMEOUT_SECONDS,
            "Upper bound on a single background job pass",
            "GGWP_JOB_PASS_TIMEOUT_SECONDS",
            "300",
        ))
}
