use crate::acme::{AccountKey, InvalidAccountKey};
use crate::bundle::bundle_path;
use crate::cert::SubjectInfo;
use crate::cli::CommandLineArguments;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

mod validate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{0} must not be empty")]
    Missing(&'static str),
    #[error("Invalid domain name {domain:?}: {reason}")]
    InvalidDomain { domain: String, reason: &'static str },
    #[error("Invalid account e-mail address {0:?}")]
    InvalidEmail(String),
    #[error("Country must be a two-letter code, got {0:?}")]
    InvalidCountry(String),
    #[error("Delay between checks must be greater than zero")]
    ZeroDelay,
    #[error("Reading account key file {}: {error}", path.display())]
    AccountKeyFile { path: PathBuf, error: std::io::Error },
    #[error("{origin} does not hold a usable account key: {reason}")]
    InvalidAccountKey {
        origin: String,
        reason: InvalidAccountKey,
    },
}

/// Settings needed to obtain the ACME account.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub staging: bool,
    /// Contact address for registration. Always set when `key` is not.
    pub email: Option<String>,
    /// Key known at startup, either from the environment or from `key_file`.
    pub key: Option<AccountKey>,
    pub key_file: Option<PathBuf>,
    pub directory_url: Option<Url>,
}

/// Validated, immutable daemon configuration.
#[derive(Clone)]
pub struct Configuration {
    pub account: AccountSettings,
    pub domain: String,
    pub subject: SubjectInfo,
    pub certificate_password: String,
    pub delay: Duration,
    pub certificate_dir: PathBuf,
    pub challenge_dir: PathBuf,
    /// `None` polls a pending challenge until the CA decides.
    pub max_validation_attempts: Option<NonZeroU32>,
}

impl Debug for Configuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("account", &self.account)
            .field("domain", &self.domain)
            .field("subject", &self.subject)
            .field("certificate_password", &"<redacted>")
            .field("delay", &self.delay)
            .field("certificate_dir", &self.certificate_dir)
            .field("challenge_dir", &self.challenge_dir)
            .field("max_validation_attempts", &self.max_validation_attempts)
            .finish()
    }
}

impl Configuration {
    /// Validates the raw arguments. Nothing is checked lazily later on.
    pub fn load(args: CommandLineArguments) -> Result<Self, ConfigurationError> {
        info!(" 0. Loading environment variables...");
        let domain = validate::domain(&args.domain)?;
        let country = validate::country(&args.country)?;
        if args.certificate_password.is_empty() {
            return Err(ConfigurationError::Missing("CERTIFICATE_PASSWORD"));
        }
        if args.delay.is_zero() {
            return Err(ConfigurationError::ZeroDelay);
        }
        if args.certificate_path.as_os_str().is_empty() {
            return Err(ConfigurationError::Missing("CERTIFICATE_PATH"));
        }
        if args.challenge_path.as_os_str().is_empty() {
            return Err(ConfigurationError::Missing("CHALLENGE_PATH"));
        }

        let key = match args.account_key.filter(|key| !key.trim().is_empty()) {
            Some(key) => Some(AccountKey::parse(key.trim()).map_err(|reason| {
                ConfigurationError::InvalidAccountKey {
                    origin: "ACCOUNT_KEY".to_string(),
                    reason,
                }
            })?),
            None => match &args.account_key_file {
                Some(path) => read_account_key_file(path)?,
                None => None,
            },
        };
        // Only registration needs a contact address
        let email = match args.account_email.filter(|email| !email.trim().is_empty()) {
            Some(email) => Some(validate::email(&email)?),
            None if key.is_none() => return Err(ConfigurationError::Missing("ACCOUNT_EMAIL")),
            None => None,
        };
        debug!(
            "Account key {}",
            if key.is_some() { "provided" } else { "not provided, a new account will be registered" }
        );

        Ok(Self {
            account: AccountSettings {
                staging: args.staging,
                email,
                key,
                key_file: args.account_key_file,
                directory_url: args.directory_url,
            },
            subject: SubjectInfo {
                country,
                state: args.state.trim().to_string(),
                locality: args.locality.trim().to_string(),
                organization: args.organization.trim().to_string(),
                unit: args.unit.trim().to_string(),
                common_name: domain.clone(),
            },
            domain,
            certificate_password: args.certificate_password,
            delay: args.delay,
            certificate_dir: args.certificate_path,
            challenge_dir: args.challenge_path,
            max_validation_attempts: NonZeroU32::new(args.max_validation_attempts),
        })
    }

    /// Where the bundle for the configured domain lives.
    pub fn bundle_path(&self) -> PathBuf {
        bundle_path(&self.certificate_dir, &self.domain)
    }
}

fn read_account_key_file(path: &Path) -> Result<Option<AccountKey>, ConfigurationError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(None),
        Ok(content) => AccountKey::parse(content.trim()).map(Some).map_err(|reason| {
            ConfigurationError::InvalidAccountKey {
                origin: format!("Account key file {}", path.display()),
                reason,
            }
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ConfigurationError::AccountKeyFile {
            path: path.to_path_buf(),
            error,
        }),
    }
}
