use crate::acme::{
    AccountKey, AcmeEngine, CaEndpoint, ChallengeResult, ChallengeStatus, EngineError,
    EngineResult, HttpChallenge, IssuedCertificate,
};
use crate::cert::{SubjectInfo, create_and_sign_csr};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, Authorization, AuthorizationStatus, ChallengeType, Identifier,
    NewAccount, NewOrder, Order, OrderStatus, Problem,
};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ORDER_POLL_ATTEMPTS: u32 = 30;

/// [`AcmeEngine`] backed by the `instant-acme` client.
#[derive(Debug, Clone)]
pub struct InstantAcmeEngine {
    order_poll_interval: Duration,
    order_poll_attempts: u32,
}

impl Default for InstantAcmeEngine {
    fn default() -> Self {
        Self {
            order_poll_interval: ORDER_POLL_INTERVAL,
            order_poll_attempts: ORDER_POLL_ATTEMPTS,
        }
    }
}

pub struct InstantOrder {
    inner: Order,
    /// Challenges the CA has already been asked to validate.
    ready: HashSet<String>,
}

fn describe_problem(problem: &Problem) -> String {
    match &problem.detail {
        Some(detail) => detail.clone(),
        None => format!("{problem:?}"),
    }
}

/// The authorization, not the individual challenge, decides whether the domain is
/// proven. The challenge's problem document explains a failure.
fn authorization_result(status: &AuthorizationStatus, error: Option<&Problem>) -> ChallengeResult {
    match status {
        AuthorizationStatus::Pending => ChallengeResult::new(ChallengeStatus::Pending),
        AuthorizationStatus::Valid => ChallengeResult::new(ChallengeStatus::Valid),
        AuthorizationStatus::Invalid => ChallengeResult::invalid(
            error.map_or_else(|| "no reason given".to_string(), describe_problem),
        ),
        other => ChallengeResult::invalid(format!("authorization is {other:?}")),
    }
}

fn engine_error(error: instant_acme::Error) -> EngineError {
    match error {
        instant_acme::Error::Api(problem) => EngineError::Protocol(anyhow!(
            "CA reported a problem: {}",
            describe_problem(&problem)
        )),
        other => EngineError::Network(anyhow::Error::new(other)),
    }
}

impl InstantAcmeEngine {
    /// Waits until the order has left the authorization phase. Returns `true` if it is
    /// already valid and needs no finalization.
    async fn wait_for_ready(&self, order: &mut Order) -> EngineResult<bool> {
        for attempt in 1..=self.order_poll_attempts {
            let state = order.refresh().await.map_err(engine_error)?;
            match state.status {
                OrderStatus::Ready => return Ok(false),
                OrderStatus::Valid => return Ok(true),
                OrderStatus::Invalid => {
                    return Err(EngineError::Protocol(anyhow!(
                        "Order became invalid before finalization"
                    )));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    debug!("Order not ready yet (attempt {attempt})");
                    tokio::time::sleep(self.order_poll_interval).await;
                }
            }
        }
        Err(EngineError::Protocol(anyhow!(
            "Order did not become ready after {} checks",
            self.order_poll_attempts
        )))
    }

    async fn download_certificate(&self, order: &mut Order) -> EngineResult<String> {
        for attempt in 1..=self.order_poll_attempts {
            match order.certificate().await.map_err(engine_error)? {
                Some(chain) => return Ok(chain),
                None => {
                    debug!("Certificate not issued yet (attempt {attempt})");
                    tokio::time::sleep(self.order_poll_interval).await;
                }
            }
        }
        Err(EngineError::Protocol(anyhow!(
            "Certificate was not issued after {} checks",
            self.order_poll_attempts
        )))
    }
}

#[async_trait]
impl AcmeEngine for InstantAcmeEngine {
    type Account = Account;
    type Order = InstantOrder;
    type Authorization = Authorization;

    async fn create_account(
        &self,
        endpoint: &CaEndpoint,
        email: Option<&str>,
    ) -> EngineResult<(Self::Account, AccountKey)> {
        let contact = email.map(|email| format!("mailto:{email}"));
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &endpoint.directory,
            None,
        )
        .await
        .map_err(engine_error)?;
        let exported = serde_json::to_string(&credentials)
            .context("Exporting account credentials")
            .map_err(EngineError::Crypto)?;
        let key = AccountKey::parse(exported)
            .context("Exported account credentials are unusable")
            .map_err(EngineError::Crypto)?;
        Ok((account, key))
    }

    async fn load_account(&self, endpoint: &CaEndpoint, key: &AccountKey) -> EngineResult<Self::Account> {
        key.ensure_registered_at(endpoint)?;
        let credentials: AccountCredentials = serde_json::from_str(key.expose())
            .context("Account key is not a valid exported ACME account")
            .map_err(EngineError::Crypto)?;
        Account::from_credentials(credentials)
            .await
            .map_err(engine_error)
    }

    async fn new_order(&self, account: &Self::Account, domains: &[String]) -> EngineResult<Self::Order> {
        let identifiers: Vec<Identifier> = domains.iter().cloned().map(Identifier::Dns).collect();
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(engine_error)?;
        debug!("Order URL: {}", order.url());
        Ok(InstantOrder {
            inner: order,
            ready: HashSet::new(),
        })
    }

    async fn authorizations(&self, order: &mut Self::Order) -> EngineResult<Vec<Self::Authorization>> {
        order.inner.authorizations().await.map_err(engine_error)
    }

    async fn http_challenge(
        &self,
        order: &mut Self::Order,
        authorization: &Self::Authorization,
    ) -> EngineResult<HttpChallenge> {
        let challenge = authorization
            .challenges
            .iter()
            .find(|challenge| challenge.r#type == ChallengeType::Http01)
            .ok_or_else(|| {
                EngineError::Protocol(anyhow!(
                    "Authorization for {:?} offers no http-01 challenge",
                    authorization.identifier
                ))
            })?;
        if authorization.status == AuthorizationStatus::Valid {
            debug!("Authorization already valid, the CA will not validate again");
            order.ready.insert(challenge.url.clone());
        }
        Ok(HttpChallenge {
            url: challenge.url.clone(),
            key_authorization: order.inner.key_authorization(challenge).as_str().to_string(),
        })
    }

    async fn validate_challenge(
        &self,
        order: &mut Self::Order,
        challenge: &HttpChallenge,
    ) -> EngineResult<ChallengeResult> {
        if order.ready.insert(challenge.url.clone()) {
            order
                .inner
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(engine_error)?;
        }
        let authorizations = order.inner.authorizations().await.map_err(engine_error)?;
        let (authorization, current) = authorizations
            .iter()
            .find_map(|authorization| {
                authorization
                    .challenges
                    .iter()
                    .find(|candidate| candidate.url == challenge.url)
                    .map(|current| (authorization, current))
            })
            .ok_or_else(|| {
                EngineError::Protocol(anyhow!("Challenge {} vanished from the order", challenge.url))
            })?;
        Ok(authorization_result(
            &authorization.status,
            current.error.as_ref(),
        ))
    }

    async fn generate_certificate(
        &self,
        order: &mut Self::Order,
        subject: &SubjectInfo,
        key: &rcgen::KeyPair,
    ) -> EngineResult<IssuedCertificate> {
        let csr = create_and_sign_csr(key, subject).map_err(EngineError::Crypto)?;
        let already_valid = self.wait_for_ready(&mut order.inner).await?;
        if already_valid {
            warn!("Order was already finalized, the downloaded certificate may use another key");
        } else {
            debug!("Finalizing order");
            order
                .inner
                .finalize(csr.der())
                .await
                .map_err(engine_error)?;
        }
        let chain_pem = self.download_certificate(&mut order.inner).await?;
        Ok(IssuedCertificate { chain_pem })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn problem(detail: &str) -> Problem {
        serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
            "detail": detail,
            "status": 403,
        }))
        .unwrap()
    }

    #[rstest]
    #[case(AuthorizationStatus::Pending, None, ChallengeResult::new(ChallengeStatus::Pending))]
    #[case(AuthorizationStatus::Valid, None, ChallengeResult::new(ChallengeStatus::Valid))]
    #[case(
        AuthorizationStatus::Invalid,
        Some(problem("Invalid response from http://example.com: 404")),
        ChallengeResult::invalid("Invalid response from http://example.com: 404")
    )]
    #[case(AuthorizationStatus::Invalid, None, ChallengeResult::invalid("no reason given"))]
    #[case(AuthorizationStatus::Revoked, None, ChallengeResult::invalid("authorization is Revoked"))]
    #[case(AuthorizationStatus::Expired, None, ChallengeResult::invalid("authorization is Expired"))]
    fn test_authorization_status_decides(
        #[case] status: AuthorizationStatus,
        #[case] error: Option<Problem>,
        #[case] expected: ChallengeResult,
    ) {
        assert_eq!(authorization_result(&status, error.as_ref()), expected);
    }

    #[test]
    fn test_problem_without_detail_is_still_described() {
        let problem: Problem =
            serde_json::from_value(serde_json::json!({"type": "urn:ietf:params:acme:error:dns"}))
                .unwrap();
        let result = authorization_result(&AuthorizationStatus::Invalid, Some(&problem));
        assert!(result.error_detail.unwrap().contains("urn:ietf:params:acme:error:dns"));
    }

    #[tokio::test]
    async fn test_key_from_another_ca_is_refused_before_connecting() -> anyhow::Result<()> {
        let key = AccountKey::parse(
            serde_json::json!({
                "id": "https://localhost:18443/acct/1",
                "key_pkcs8": "MIGHAgEAMBMGByqGSM49AgEGCCqGSM49AwEHBG0wawIBAQQg",
                "directory": "https://localhost:18443/dir",
            })
            .to_string(),
        )?;
        let endpoint = CaEndpoint {
            directory: "https://localhost:19443/dir".to_string(),
            staging: false,
        };

        let err = InstantAcmeEngine::default()
            .load_account(&endpoint, &key)
            .await
            .err()
            .expect("expected load_account to fail");

        assert!(matches!(err, EngineError::Protocol(_)));
        assert!(err.to_string().contains("https://localhost:18443/dir"), "{err}");
        Ok(())
    }
}
