use crate::account::{AccountManager, save_key_file};
use crate::acme::{AccountKey, AcmeEngine};
use crate::config::Configuration;
use crate::error::RenewalResult;
use crate::expiry::{ExpiryStatus, check_expiry};
use crate::issuer::OrderOrchestrator;
use crate::time::{format_date, humanize_duration};
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one successful pass through the renewal cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    StillValid { expiry: ExpiryStatus },
    Renewed { bundle: PathBuf },
}

/// The supervision loop. Runs one renewal cycle at a time, forever.
#[allow(clippy::module_name_repetitions)]
pub struct RenewService<E: AcmeEngine> {
    engine: E,
    config: Configuration,
    /// Starts out as the configured key and is filled in once an account gets registered.
    account_key: Option<AccountKey>,
    consecutive_failures: u32,
    /// Message of the previous failed cycle and how many cycles in a row ended with it.
    last_failure: Option<(String, u32)>,
    poll_interval: Option<Duration>,
}

impl<E: AcmeEngine> RenewService<E> {
    pub fn new(engine: E, config: Configuration) -> Self {
        let account_key = config.account.key.clone();
        Self {
            engine,
            config,
            account_key,
            consecutive_failures: 0,
            last_failure: None,
            poll_interval: None,
        }
    }

    /// Overrides the pause between challenge validation requests.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn account_key(&self) -> Option<&AccountKey> {
        self.account_key.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Checks the bundle and renews it if it is due.
    pub async fn renewal_cycle(&mut self) -> RenewalResult<CycleOutcome> {
        let status = check_expiry(&self.config.bundle_path(), &self.config.certificate_password).await?;
        if !status.due {
            return Ok(CycleOutcome::StillValid { expiry: status });
        }
        if let Some(not_after) = status.not_after {
            info!("Certificate expires {}, renewing", format_date(not_after));
        }

        let session = AccountManager::new(&self.engine, &self.config.account)
            .load_or_create(self.account_key.as_ref())
            .await?;
        if let Some(key) = session.created_key {
            self.remember_account_key(key).await;
        }

        let mut orchestrator = OrderOrchestrator::new(&self.engine, &self.config);
        if let Some(poll_interval) = self.poll_interval {
            orchestrator = orchestrator.with_poll_interval(poll_interval);
        }
        let bundle = orchestrator.run_renewal(&session.account).await?;
        Ok(CycleOutcome::Renewed { bundle })
    }

    async fn remember_account_key(&mut self, key: AccountKey) {
        match &self.config.account.key_file {
            Some(path) => match save_key_file(path, &key).await {
                Ok(()) => info!("Account key saved to {}", path.display()),
                Err(e) => warn!("Could not persist new account key: {e}"),
            },
            None => warn!(
                "Registered a new ACME account. Set ACCOUNT_KEY_FILE to keep using it after a restart"
            ),
        }
        self.account_key = Some(key);
    }

    /// Runs one cycle and logs its outcome. Errors never escape this function.
    pub async fn run_once(&mut self) -> Option<CycleOutcome> {
        match self.renewal_cycle().await {
            Ok(outcome) => {
                match &outcome {
                    CycleOutcome::StillValid { expiry } => info!(
                        " V. Current certificate is still valid :) [{}]",
                        expiry.display_not_after()
                    ),
                    CycleOutcome::Renewed { bundle } => {
                        info!("Certificate bundle written to {}", bundle.display());
                    }
                }
                self.consecutive_failures = 0;
                self.last_failure = None;
                Some(outcome)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let message = e.to_string();
                error!(" X. ERROR {message}");
                let repeated = match self.last_failure.take() {
                    Some((previous, count)) if previous == message => count + 1,
                    _ => 1,
                };
                if repeated > 1 {
                    warn!("The last {repeated} renewal cycles failed with the same error");
                }
                self.last_failure = Some((message, repeated));
                None
            }
        }
    }

    pub async fn run(mut self) -> Infallible {
        loop {
            self.run_once().await;
            if let Ok(delay) = time::Duration::try_from(self.config.delay) {
                debug!("Next check in {}", humanize_duration(delay));
            }
            tokio::time::sleep(self.config.delay).await;
        }
    }
}
