use crate::time::parse_delay;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Every option can also be given through the environment variable next to it.
#[derive(Debug, Clone, Parser)]
#[command(
    version,
    about = "Keeps one domain's PKCS#12 certificate bundle valid using ACME",
    long_about = "",
    args_override_self = true
)]
pub struct CommandLineArguments {
    /// Use the staging CA (YES/NO)
    #[arg(long, env = "STAGING", default_value = "NO", value_parser = parse_flag, action = ArgAction::Set)]
    pub staging: bool,
    /// Contact address used when registering a new ACME account (required without an account key)
    #[arg(long, env = "ACCOUNT_EMAIL")]
    pub account_email: Option<String>,
    /// Exported key of an existing ACME account
    #[arg(long, env = "ACCOUNT_KEY", hide_env_values = true)]
    pub account_key: Option<String>,
    /// File the account key is read from at startup and written to after registration
    #[arg(long, env = "ACCOUNT_KEY_FILE")]
    pub account_key_file: Option<PathBuf>,
    /// ACME directory to use instead of Let's Encrypt
    #[arg(long, env = "DIRECTORY_URL")]
    pub directory_url: Option<Url>,
    /// Domain name the certificate is issued for
    #[arg(long, env = "DOMAIN")]
    pub domain: String,
    /// Two-letter country code placed in the certificate subject
    #[arg(long, env = "CERT_COUNTRY")]
    pub country: String,
    #[arg(long, env = "CERT_STATE", default_value = "")]
    pub state: String,
    #[arg(long, env = "CERT_LOCALITY", default_value = "")]
    pub locality: String,
    #[arg(long, env = "CERT_ORGANISATION", default_value = "")]
    pub organization: String,
    #[arg(long, env = "CERT_ORGANISATION_UNIT", default_value = "")]
    pub unit: String,
    /// Password protecting the certificate bundle
    #[arg(long, env = "CERTIFICATE_PASSWORD", hide_env_values = true)]
    pub certificate_password: String,
    /// Pause between two checks: milliseconds, or a duration such as `12h`
    #[arg(long, env = "DELAY", value_parser = parse_delay)]
    pub delay: Duration,
    /// Directory the `<domain>.pfx` bundle is written to
    #[arg(long, env = "CERTIFICATE_PATH")]
    pub certificate_path: PathBuf,
    /// Directory served at `/.well-known/acme-challenge/`
    #[arg(long, env = "CHALLENGE_PATH")]
    pub challenge_path: PathBuf,
    /// Give up on a pending challenge after this many validation requests (0 = never)
    #[arg(long, env = "MAX_VALIDATION_ATTEMPTS", default_value_t = 30)]
    pub max_validation_attempts: u32,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via `CERTKEEPER_LOG` environment variable)
    #[clap(long, short, action)]
    pub verbose: bool,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" | "" => Ok(false),
        other => Err(format!("expected YES or NO, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("YES", true)]
    #[case("yes", true)]
    #[case("true", true)]
    #[case("NO", false)]
    #[case("", false)]
    #[case("0", false)]
    fn test_parse_flag(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(parse_flag(input), Ok(expected));
    }

    #[test]
    fn test_parse_flag_rejects_unknown() {
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let args = CommandLineArguments::try_parse_from([
            "certkeeper",
            "--staging",
            "YES",
            "--account-email",
            "admin@example.com",
            "--domain",
            "example.com",
            "--country",
            "NL",
            "--certificate-password",
            "pw",
            "--delay",
            "60000",
            "--certificate-path",
            "/certs",
            "--challenge-path",
            "/challenges",
        ])
        .unwrap();
        assert!(args.staging);
        assert_eq!(args.delay, Duration::from_secs(60));
        assert_eq!(args.max_validation_attempts, 30);
        assert_eq!(args.state, "");
        assert!(args.account_key.is_none());
        assert_eq!(args.account_email.as_deref(), Some("admin@example.com"));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let args = CommandLineArguments::try_parse_from([
            "certkeeper",
            "--account-email",
            "admin@example.com",
            "--domain",
            "example.com",
            "--domain",
            "example.org",
            "--country",
            "NL",
            "--certificate-password",
            "pw",
            "--delay",
            "12h",
            "--certificate-path",
            "/certs",
            "--challenge-path",
            "/challenges",
        ])
        .unwrap();
        assert_eq!(args.domain, "example.org");
        assert_eq!(args.delay, Duration::from_secs(12 * 3600));
    }
}
