//! An in-memory [`AcmeEngine`] that plays back a configured script.
//!
//! Used for testing the renewal flow without a CA. Certificates are real X.509
//! structures signed by a throwaway intermediate, so they survive bundling and
//! expiry inspection exactly like issued ones.

use crate::acme::{
    AccountKey, AcmeEngine, CaEndpoint, ChallengeResult, ChallengeStatus, EngineError,
    EngineResult, HttpChallenge, IssuedCertificate,
};
use crate::cert::{SubjectInfo, certificate_params, create_and_sign_csr};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use strum::Display;
use time::{Duration, OffsetDateTime};

pub const DEFAULT_KEY_AUTHORIZATION: &str = "scripted-token.scripted-thumbprint";
pub const DEFAULT_CERTIFICATE_LIFETIME: Duration = Duration::days(90);
/// Stands in for the private key inside exported credentials. Never used to sign.
const SCRIPTED_KEY_PKCS8: &str = "c2NyaXB0ZWQtYWNjb3VudC1rZXk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Operation {
    CreateAccount,
    LoadAccount,
    NewOrder,
    Authorizations,
    HttpChallenge,
    ValidateChallenge,
    GenerateCertificate,
}

#[derive(Debug, Clone)]
pub struct ScriptedAccount {
    pub url: String,
    pub directory: String,
}

#[derive(Debug, Clone)]
pub struct ScriptedOrder {
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptedAuthorization {
    pub domain: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    challenge_statuses: VecDeque<ChallengeResult>,
    pending_failures: HashMap<Operation, u32>,
    calls: HashMap<Operation, u32>,
    served_artifacts: Vec<Option<String>>,
    accounts_created: u32,
}

#[derive(Debug)]
pub struct ScriptedEngine {
    state: Mutex<ScriptState>,
    key_authorization: String,
    artifact_dir: Option<PathBuf>,
    certificate_lifetime: Duration,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Every challenge validates on the first request and certificates live 90 days.
    pub fn new() -> Self {
        let state = ScriptState {
            challenge_statuses: VecDeque::from([ChallengeResult::new(ChallengeStatus::Valid)]),
            ..ScriptState::default()
        };
        Self {
            state: Mutex::new(state),
            key_authorization: DEFAULT_KEY_AUTHORIZATION.to_string(),
            artifact_dir: None,
            certificate_lifetime: DEFAULT_CERTIFICATE_LIFETIME,
        }
    }

    #[must_use]
    pub fn with_key_authorization(mut self, key_authorization: impl Into<String>) -> Self {
        self.key_authorization = key_authorization.into();
        self
    }

    /// Results handed out by successive validation requests. The last one repeats forever.
    #[must_use]
    pub fn with_challenge_statuses(
        self,
        statuses: impl IntoIterator<Item = ChallengeResult>,
    ) -> Self {
        let statuses: VecDeque<_> = statuses.into_iter().collect();
        if !statuses.is_empty() {
            self.state.lock().challenge_statuses = statuses;
        }
        self
    }

    #[must_use]
    pub fn with_certificate_lifetime(mut self, lifetime: Duration) -> Self {
        self.certificate_lifetime = lifetime;
        self
    }

    /// On every validation request, look up what the challenge directory would serve.
    #[must_use]
    pub fn recording_artifacts_in(mut self, challenge_dir: &Path) -> Self {
        self.artifact_dir = Some(challenge_dir.to_path_buf());
        self
    }

    /// Makes the next call of `operation` fail with a network error.
    pub fn fail_next(&self, operation: Operation) {
        *self
            .state
            .lock()
            .pending_failures
            .entry(operation)
            .or_default() += 1;
    }

    pub fn calls(&self, operation: Operation) -> u32 {
        self.state
            .lock()
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Artifact content seen at each validation request, `None` where the file was absent.
    pub fn served_artifacts(&self) -> Vec<Option<String>> {
        self.state.lock().served_artifacts.clone()
    }

    /// An account handle that was never registered, for driving orders directly.
    pub fn scripted_account(&self) -> ScriptedAccount {
        ScriptedAccount {
            url: "https://ca.invalid/acct/0".to_string(),
            directory: CaEndpoint::lets_encrypt(true).directory,
        }
    }

    /// Credentials in the same JSON shape a real CA account exports to.
    fn export_account(account: &ScriptedAccount) -> EngineResult<AccountKey> {
        let exported = serde_json::json!({
            "id": account.url,
            "key_pkcs8": SCRIPTED_KEY_PKCS8,
            "directory": account.directory,
        });
        AccountKey::parse(exported.to_string())
            .context("Exporting scripted account")
            .map_err(EngineError::Crypto)
    }

    fn record(&self, operation: Operation) -> EngineResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_default() += 1;
        let pending = state.pending_failures.entry(operation).or_default();
        if *pending > 0 {
            *pending -= 1;
            return Err(EngineError::Network(anyhow!(
                "scripted failure during {operation}"
            )));
        }
        Ok(())
    }

    fn next_challenge_result(&self) -> ChallengeResult {
        let mut state = self.state.lock();
        if state.challenge_statuses.len() > 1 {
            return state
                .challenge_statuses
                .pop_front()
                .unwrap_or_else(|| ChallengeResult::new(ChallengeStatus::Valid));
        }
        state
            .challenge_statuses
            .front()
            .cloned()
            .unwrap_or_else(|| ChallengeResult::new(ChallengeStatus::Valid))
    }

    fn issue_chain(&self, subject: &SubjectInfo, key: &KeyPair) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();

        let issuer_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let mut issuer_params = CertificateParams::new(Vec::<String>::new())?;
        issuer_params
            .distinguished_name
            .push(DnType::CommonName, "Scripted Intermediate");
        issuer_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        issuer_params.not_before = now - Duration::days(1);
        issuer_params.not_after = now + self.certificate_lifetime + Duration::days(365);
        let issuer = issuer_params.self_signed(&issuer_key)?;

        let mut leaf_params = certificate_params(subject)?;
        leaf_params.not_before = now - Duration::hours(1);
        leaf_params.not_after = now + self.certificate_lifetime;
        let leaf = leaf_params.signed_by(key, &issuer, &issuer_key)?;

        Ok(format!("{}{}", leaf.pem(), issuer.pem()))
    }
}

#[async_trait]
impl AcmeEngine for ScriptedEngine {
    type Account = ScriptedAccount;
    type Order = ScriptedOrder;
    type Authorization = ScriptedAuthorization;

    async fn create_account(
        &self,
        endpoint: &CaEndpoint,
        _email: Option<&str>,
    ) -> EngineResult<(Self::Account, AccountKey)> {
        self.record(Operation::CreateAccount)?;
        let number = {
            let mut state = self.state.lock();
            state.accounts_created += 1;
            state.accounts_created
        };
        let account = ScriptedAccount {
            url: format!("https://ca.invalid/acct/{number}"),
            directory: endpoint.directory.clone(),
        };
        let key = Self::export_account(&account)?;
        Ok((account, key))
    }

    async fn load_account(&self, endpoint: &CaEndpoint, key: &AccountKey) -> EngineResult<Self::Account> {
        self.record(Operation::LoadAccount)?;
        key.ensure_registered_at(endpoint)?;
        Ok(ScriptedAccount {
            url: key.account_url().to_string(),
            directory: endpoint.directory.clone(),
        })
    }

    async fn new_order(&self, _account: &Self::Account, domains: &[String]) -> EngineResult<Self::Order> {
        self.record(Operation::NewOrder)?;
        Ok(ScriptedOrder {
            domains: domains.to_vec(),
        })
    }

    async fn authorizations(&self, order: &mut Self::Order) -> EngineResult<Vec<Self::Authorization>> {
        self.record(Operation::Authorizations)?;
        Ok(order
            .domains
            .iter()
            .map(|domain| ScriptedAuthorization {
                domain: domain.clone(),
            })
            .collect())
    }

    async fn http_challenge(
        &self,
        _order: &mut Self::Order,
        authorization: &Self::Authorization,
    ) -> EngineResult<HttpChallenge> {
        self.record(Operation::HttpChallenge)?;
        Ok(HttpChallenge {
            url: format!("https://ca.invalid/chall/{}", authorization.domain),
            key_authorization: self.key_authorization.clone(),
        })
    }

    async fn validate_challenge(
        &self,
        _order: &mut Self::Order,
        challenge: &HttpChallenge,
    ) -> EngineResult<ChallengeResult> {
        self.record(Operation::ValidateChallenge)?;
        if let Some(dir) = &self.artifact_dir {
            let served = std::fs::read_to_string(dir.join(challenge.token())).ok();
            self.state.lock().served_artifacts.push(served);
        }
        Ok(self.next_challenge_result())
    }

    async fn generate_certificate(
        &self,
        _order: &mut Self::Order,
        subject: &SubjectInfo,
        key: &KeyPair,
    ) -> EngineResult<IssuedCertificate> {
        self.record(Operation::GenerateCertificate)?;
        create_and_sign_csr(key, subject).map_err(EngineError::Crypto)?;
        let chain_pem = self
            .issue_chain(subject, key)
            .context("Signing scripted certificate")
            .map_err(EngineError::Protocol)?;
        Ok(IssuedCertificate { chain_pem })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{load_certificates_from_memory, new_certificate_key};

    fn subject() -> SubjectInfo {
        SubjectInfo {
            country: "NL".to_string(),
            state: String::new(),
            locality: String::new(),
            organization: String::new(),
            unit: String::new(),
            common_name: "example.com".to_string(),
        }
    }

    #[test]
    fn test_last_status_repeats() {
        let engine = ScriptedEngine::new().with_challenge_statuses([
            ChallengeResult::new(ChallengeStatus::Pending),
            ChallengeResult::new(ChallengeStatus::Valid),
        ]);
        assert_eq!(engine.next_challenge_result().status, ChallengeStatus::Pending);
        assert_eq!(engine.next_challenge_result().status, ChallengeStatus::Valid);
        assert_eq!(engine.next_challenge_result().status, ChallengeStatus::Valid);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let engine = ScriptedEngine::new();
        engine.fail_next(Operation::NewOrder);
        let account = engine.scripted_account();
        let domains = ["example.com".to_string()];
        assert!(engine.new_order(&account, &domains).await.is_err());
        assert!(engine.new_order(&account, &domains).await.is_ok());
        assert_eq!(engine.calls(Operation::NewOrder), 2);
    }

    #[tokio::test]
    async fn test_created_account_loads_only_at_its_ca() -> anyhow::Result<()> {
        let engine = ScriptedEngine::new();
        let staging = CaEndpoint::lets_encrypt(true);
        let (created, key) = engine.create_account(&staging, None).await?;

        let loaded = engine.load_account(&staging, &key).await?;
        assert_eq!(loaded.url, created.url);

        let err = engine
            .load_account(&CaEndpoint::lets_encrypt(false), &key)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_issued_chain_is_bound_to_key() -> anyhow::Result<()> {
        let engine = ScriptedEngine::new().with_certificate_lifetime(Duration::days(30));
        let key = new_certificate_key()?;
        let mut order = ScriptedOrder {
            domains: vec!["example.com".to_string()],
        };
        let issued = engine.generate_certificate(&mut order, &subject(), &key).await?;

        let chain = load_certificates_from_memory(&issued.chain_pem, None)?;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].common_name.as_deref(), Some("example.com"));
        assert_eq!(chain[1].common_name.as_deref(), Some("Scripted Intermediate"));
        assert_eq!(chain[0].issuer, chain[1].subject);
        let lifetime = chain[0].validity.not_after - OffsetDateTime::now_utc();
        assert!(lifetime > Duration::days(29) && lifetime <= Duration::days(30));
        Ok(())
    }
}
