use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_JSON: &str = "log-json";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("GGWP_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_JSON)
                .long(ARG_LOG_JSON)
                .help("Emit logs as JSON lines")
                .env("GGWP_LOG_JSON")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_log_level() {
        let parser = validator_log_level();
        let command = Command::new("test").arg(Arg::new("level").value_parser(parser));

        let matches = command.clone().get_matches_from(vec!["test", "debug"]);
        assert_eq!(matches.get_one::<u8>("level").copied(), Some(3));

        let matches = command.clone().get_matches_from(vec!["test", "2"]);
        assert_eq!(matches.get_one::<u8>("level").copied(), Some(2));

        assert!(command.try_get_matches_from(vec!["test", "loud"]).is_err());
    }

    #[test]
    fn test_log_json_flag() {
        let command = with_args(Command::new("test"));
        let matches = command.get_matches_from(vec!["test", "--log-json"]);
        assert!(matches.get_flag(ARG_LOG_JSON));
    }
}
