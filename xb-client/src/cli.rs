//! Command-line option parsing (§6.6).
//!
//! The format is dynamic key/value pairs with no fixed option set, which
//! doesn't fit a `clap`/`structopt` derive — there's no fixed set of flags
//! to generate from, just whatever configuration keys the caller passes on
//! argv, so this stays a small hand-rolled scanner.

pub const USAGE: &str = "\
Usage: <program> [-help|--help] [-<option> <value>]...

Recognized options:
  dispatch/connection/pingInterval
  dispatch/connection/retries
  dispatch/connection/delay
  dispatch/connection/plugin/socket/hostname
  dispatch/connection/plugin/socket/port
  dispatch/connection/plugin/socket/localHostname
  dispatch/connection/plugin/socket/localPort
  dispatch/connection/plugin/socket/useUdpForOneway
  dispatch/connection/plugin/socket/compress/type
  queue/connection/maxEntries
  queue/connection/maxBytes
  queue/connection/dbName
  queue/connection/nodeId
  queue/connection/queueName
  queue/connection/tablePrefix
  logLevel
";

/// Result of parsing argv: either the caller should print usage and exit
/// 0, or here are the option pairs to feed to `ClientConfig::from_options`.
#[derive(Debug, PartialEq, Eq)]
pub enum CliOutcome {
    Help,
    Options(Vec<(String, String)>),
}

/// Any other single- or double-dash token is an option name whose value is
/// the next token (§6.6). A dash token with no following token gets an
/// empty-string value rather than an error.
pub fn parse_cli<I, S>(args: I) -> CliOutcome
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = Vec::new();
    let mut iter = args.into_iter();

    while let Some(token) = iter.next() {
        let token = token.as_ref();
        if token == "-help" || token == "--help" {
            return CliOutcome::Help;
        }
        if let Some(name) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) {
            let value = iter.next().map(|v| v.as_ref().to_owned()).unwrap_or_default();
            options.push((name.to_owned(), value));
        }
    }

    CliOutcome::Options(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_flag_short_and_long() {
        assert_eq!(parse_cli(["-help"]), CliOutcome::Help);
        assert_eq!(parse_cli(["--help"]), CliOutcome::Help);
    }

    #[test]
    fn option_value_pairs() {
        let outcome = parse_cli(["-dispatch/connection/pingInterval", "5000", "--logLevel", "trace"]);
        assert_eq!(
            outcome,
            CliOutcome::Options(vec![
                ("dispatch/connection/pingInterval".to_owned(), "5000".to_owned()),
                ("logLevel".to_owned(), "trace".to_owned()),
            ])
        );
    }

    #[test]
    fn dangling_option_gets_empty_value() {
        let outcome = parse_cli(["-logLevel"]);
        assert_eq!(outcome, CliOutcome::Options(vec![("logLevel".to_owned(), String::new())]));
    }
}
