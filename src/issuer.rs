use crate::acme::AcmeEngine;
use crate::bundle;
use crate::cert::{load_certificates_from_memory, new_certificate_key};
use crate::challenge_solver::HttpChallengeFulfiller;
use crate::config::Configuration;
use crate::error::{EngineContext, RenewalError, RenewalResult};
use anyhow::{Context, anyhow};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Sequences one certificate request for the configured domain: order, proof of
/// control, issuance and bundling.
pub struct OrderOrchestrator<'a, E: AcmeEngine> {
    engine: &'a E,
    config: &'a Configuration,
    poll_interval: Option<Duration>,
}

impl<'a, E: AcmeEngine> OrderOrchestrator<'a, E> {
    pub fn new(engine: &'a E, config: &'a Configuration) -> Self {
        Self {
            engine,
            config,
            poll_interval: None,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Obtains a fresh certificate and returns the path of the written bundle.
    ///
    /// Nothing is reused between attempts: a failure at any step abandons the order.
    pub async fn run_renewal(&self, account: &E::Account) -> RenewalResult<PathBuf> {
        let domain = &self.config.domain;
        info!(" 3. Creating order {domain}...");
        let mut order = self
            .engine
            .new_order(account, std::slice::from_ref(domain))
            .await
            .during("Creating order")?;

        let mut fulfiller = HttpChallengeFulfiller::new(
            self.engine,
            &self.config.challenge_dir,
            self.config.max_validation_attempts,
        );
        if let Some(poll_interval) = self.poll_interval {
            fulfiller = fulfiller.with_poll_interval(poll_interval);
        }
        fulfiller.fulfill(&mut order, domain).await?;

        info!(" 7. Generating Certificate...");
        let key = new_certificate_key().map_err(RenewalError::KeyGeneration)?;
        let issued = self
            .engine
            .generate_certificate(&mut order, &self.config.subject, &key)
            .await
            .during("Generating certificate")?;

        info!(" 8. Building PFX...");
        let chain = load_certificates_from_memory(&issued.chain_pem, None)
            .context("CA returned an unreadable certificate chain")
            .map_err(RenewalError::BundleEncode)?;
        if chain.is_empty() {
            return Err(RenewalError::BundleEncode(anyhow!(
                "CA returned an empty certificate chain"
            )));
        }
        debug!(
            "Received chain of {} certificates, leaf expires {}",
            chain.len(),
            chain[0].validity.not_after
        );
        let bytes = bundle::encode(
            &chain,
            &key.serialize_der(),
            domain,
            &self.config.certificate_password,
        )
        .map_err(RenewalError::BundleEncode)?;

        let bundle_path = self.config.bundle_path();
        write_atomically(&bundle_path, &bytes).await?;
        Ok(bundle_path)
    }
}

/// Writes next to the target and renames, so readers never see a half-written bundle.
async fn write_atomically(path: &Path, contents: &[u8]) -> RenewalResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RenewalError::io("Creating certificate directory", parent, e))?;
    }
    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);
    tokio::fs::write(&temporary, contents)
        .await
        .map_err(|e| RenewalError::io("Writing certificate bundle", &temporary, e))?;
    tokio::fs::rename(&temporary, path)
        .await
        .map_err(|e| RenewalError::io("Replacing certificate bundle", path, e))?;
    Ok(())
}
