use crate::acme::{AccountKey, AcmeEngine, CaEndpoint};
use crate::config::AccountSettings;
use crate::error::{EngineContext, RenewalError, RenewalResult};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// An account ready for ordering at the configured endpoint.
pub struct AccountSession<A> {
    pub account: A,
    /// Set only when this session registered a new account.
    pub created_key: Option<AccountKey>,
}

pub struct AccountManager<'a, E: AcmeEngine> {
    engine: &'a E,
    settings: &'a AccountSettings,
}

impl<'a, E: AcmeEngine> AccountManager<'a, E> {
    pub fn new(engine: &'a E, settings: &'a AccountSettings) -> Self {
        Self { engine, settings }
    }

    pub fn endpoint(&self) -> CaEndpoint {
        match &self.settings.directory_url {
            Some(url) => CaEndpoint {
                directory: url.to_string(),
                staging: self.settings.staging,
            },
            None => self.engine.select_endpoint(self.settings.staging),
        }
    }

    /// Restores the account behind `known_key`, or registers a new one if there is none.
    /// A key registered at another CA than the configured one is an error.
    pub async fn load_or_create(
        &self,
        known_key: Option<&AccountKey>,
    ) -> RenewalResult<AccountSession<E::Account>> {
        let endpoint = self.endpoint();
        info!(" 1. Setting Environment {endpoint}...");
        match known_key {
            Some(key) => {
                info!(" 2. Using existing account...");
                let account = self
                    .engine
                    .load_account(&endpoint, key)
                    .await
                    .during("Loading account")?;
                Ok(AccountSession {
                    account,
                    created_key: None,
                })
            }
            None => {
                info!(" 2. Creating account...");
                let (account, key) = self
                    .engine
                    .create_account(&endpoint, self.settings.email.as_deref())
                    .await
                    .during("Creating account")?;
                match &self.settings.email {
                    Some(email) => debug!("Registered new account for {email}"),
                    None => debug!("Registered new account without contact address"),
                }
                Ok(AccountSession {
                    account,
                    created_key: Some(key),
                })
            }
        }
    }
}

/// Stores a freshly registered key so later restarts reuse the account.
pub async fn save_key_file(path: &Path, key: &AccountKey) -> RenewalResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RenewalError::io("Creating account key directory", parent, e))?;
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(path)
        .await
        .map_err(|e| RenewalError::io("Opening account key file", path, e))?;
    file.write_all(key.expose().as_bytes())
        .await
        .map_err(|e| RenewalError::io("Writing account key file", path, e))?;
    file.flush()
        .await
        .map_err(|e| RenewalError::io("Writing account key file", path, e))?;
    // The mode above only applies to files that did not exist yet
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
        {
            warn!(
                "Could not restrict permissions of account key file {}: {e}",
                path.display()
            );
        }
    }
    Ok(())
}
