use crate::acme::{AcmeEngine, ChallengeStatus, EngineError, HttpChallenge};
use crate::error::{EngineContext, RenewalError, RenewalResult};
use anyhow::anyhow;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Pause between two validation requests for a challenge that is still pending.
pub const VALIDATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// ACME tokens are base64url without padding. Anything else must never become a file name.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The key authorization file an external web server serves below
/// `/.well-known/acme-challenge/`.
#[derive(Debug)]
pub struct ChallengeArtifact {
    path: PathBuf,
}

impl ChallengeArtifact {
    pub async fn deploy(challenge_dir: &Path, challenge: &HttpChallenge) -> RenewalResult<Self> {
        let token = challenge.token();
        if !is_valid_token(token) {
            return Err(RenewalError::Ca {
                operation: "Reading challenge",
                error: EngineError::Protocol(anyhow!(
                    "CA sent a challenge token that is not base64url: {token:?}"
                )),
            });
        }
        tokio::fs::create_dir_all(challenge_dir)
            .await
            .map_err(|e| RenewalError::io("Creating challenge directory", challenge_dir, e))?;
        let path = challenge_dir.join(token);
        let mut challenge_file = File::create(&path)
            .await
            .map_err(|e| RenewalError::io("Creating challenge file", &path, e))?;
        challenge_file
            .write_all(challenge.key_authorization.as_bytes())
            .await
            .map_err(|e| RenewalError::io("Writing challenge file", &path, e))?;
        challenge_file
            .flush()
            .await
            .map_err(|e| RenewalError::io("Writing challenge file", &path, e))?;
        debug!("Challenge file written to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file. Failures are only logged, the challenge outcome stands either way.
    pub async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(
                "Failed to remove challenge file {}: {e}",
                self.path.display()
            );
        }
    }
}

/// Proves control over a domain via http-01.
pub struct HttpChallengeFulfiller<'a, E: AcmeEngine> {
    engine: &'a E,
    challenge_dir: &'a Path,
    poll_interval: Duration,
    max_attempts: Option<NonZeroU32>,
}

impl<'a, E: AcmeEngine> HttpChallengeFulfiller<'a, E> {
    pub fn new(engine: &'a E, challenge_dir: &'a Path, max_attempts: Option<NonZeroU32>) -> Self {
        Self {
            engine,
            challenge_dir,
            poll_interval: VALIDATION_POLL_INTERVAL,
            max_attempts,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the challenge of the order's first authorization to a terminal state.
    ///
    /// Returns once the CA reports the challenge valid. An invalid challenge fails with
    /// [`RenewalError::ValidationFailed`], since finalizing such an order is bound to be
    /// rejected anyway.
    pub async fn fulfill(&self, order: &mut E::Order, domain: &str) -> RenewalResult<()> {
        info!(" 4. Validating domain {domain}...");
        let authorizations = self
            .engine
            .authorizations(order)
            .await
            .during("Fetching authorizations")?;
        let Some(authorization) = authorizations.first() else {
            return Err(RenewalError::Ca {
                operation: "Fetching authorizations",
                error: EngineError::Protocol(anyhow!("Order for {domain} has no authorization")),
            });
        };
        if authorizations.len() > 1 {
            warn!(
                "Order for {domain} has {} authorizations, only the first one is handled",
                authorizations.len()
            );
        }
        let challenge = self
            .engine
            .http_challenge(order, authorization)
            .await
            .during("Selecting http-01 challenge")?;
        debug!("Selected http-01 challenge @ {}", challenge.url);

        info!(" 5. Writing challenge file");
        let artifact = ChallengeArtifact::deploy(self.challenge_dir, &challenge).await?;
        let outcome = self.await_validation(order, &challenge, domain).await;
        artifact.cleanup().await;
        outcome
    }

    async fn await_validation(
        &self,
        order: &mut E::Order,
        challenge: &HttpChallenge,
        domain: &str,
    ) -> RenewalResult<()> {
        let mut attempts: u32 = 0;
        loop {
            if attempts > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            attempts += 1;
            let result = self
                .engine
                .validate_challenge(order, challenge)
                .await
                .during("Validating challenge")?;
            match result.status {
                ChallengeStatus::Valid => {
                    info!(" 6. Domain {domain} is valid!");
                    return Ok(());
                }
                ChallengeStatus::Invalid => {
                    let detail = result
                        .error_detail
                        .unwrap_or_else(|| "the CA gave no reason".to_string());
                    info!(" 6. Domain {domain} is NOT valid! {detail}");
                    return Err(RenewalError::ValidationFailed {
                        domain: domain.to_string(),
                        detail,
                    });
                }
                status @ (ChallengeStatus::Pending | ChallengeStatus::Processing) => {
                    debug!("Challenge for {domain} is {status} after {attempts} validation requests");
                    if self.max_attempts.is_some_and(|max| attempts >= max.get()) {
                        return Err(RenewalError::ValidationTimeout {
                            domain: domain.to_string(),
                            attempts,
                        });
                    }
                }
            }
        }
    }
}
