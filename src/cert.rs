use anyhow::{Context, Error};
use rcgen::{CertificateParams, CertificateSigningRequest, DistinguishedName, DnType, KeyPair};
use std::io::{BufRead, Cursor, Seek};
use x509_parser::num_bigint::BigUint;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

/// The maximum number of certificates we will parse in a PEM-array of certificates by default
const DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

/// Subject fields placed in the CSR. The common name is always the managed domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectInfo {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub unit: String,
    pub common_name: String,
}

impl SubjectInfo {
    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let fields = [
            (DnType::CountryName, &self.country),
            (DnType::StateOrProvinceName, &self.state),
            (DnType::LocalityName, &self.locality),
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.unit),
            (DnType::CommonName, &self.common_name),
        ];
        for (dn_type, value) in fields {
            // Empty RDNs are rejected by most CAs
            if !value.is_empty() {
                dn.push(dn_type, value.as_str());
            }
        }
        dn
    }
}

/// Certificate parameters for `subject`, with the common name doubling as the only SAN.
pub fn certificate_params(subject: &SubjectInfo) -> Result<CertificateParams, Error> {
    let mut params = CertificateParams::new(vec![subject.common_name.clone()])
        .context("Invalid subject alternative name")?;
    params.distinguished_name = subject.distinguished_name();
    Ok(params)
}

/// Generates the ECDSA P-256 key every issued certificate is bound to.
pub fn new_certificate_key() -> Result<KeyPair, Error> {
    KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).context("Generating P-256 certificate key")
}

pub fn create_and_sign_csr(
    cert_key: &KeyPair,
    subject: &SubjectInfo,
) -> Result<CertificateSigningRequest, Error> {
    let params = certificate_params(subject).context("CSR generation failed")?;
    let csr = params
        .serialize_request(cert_key)
        .context("Signing CSR failed")?;
    Ok(csr)
}

pub fn load_certificates_from_memory<B: AsRef<[u8]>>(
    pem_bytes: B,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let reader = Cursor::new(pem_bytes);
    load_certificates_from_reader(reader, limit)
}

fn load_certificates_from_reader<R: BufRead + Seek>(
    reader: R,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let mut certificates = Vec::new();
    for pem in
        Pem::iter_from_reader(reader).take(limit.unwrap_or(DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH))
    {
        let pem = pem.context("Reading PEM block failed")?;
        let parsed_x509 = ParsedX509Certificate::try_from(pem.contents)?;
        certificates.push(parsed_x509);
    }
    Ok(certificates)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedX509Certificate {
    pub serial: BigUint,
    pub subject: String,
    pub common_name: Option<String>,
    pub issuer: String,
    pub validity: Validity,
    pub raw_bytes: Vec<u8>,
}

impl TryFrom<Vec<u8>> for ParsedX509Certificate {
    type Error = Error;

    fn try_from(der_bytes: Vec<u8>) -> anyhow::Result<ParsedX509Certificate> {
        let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .context("Reading X.509 structure: Decoding DER failed")?;
        let serial = cert.serial.clone();
        let subject = cert.subject().to_string();
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let issuer = cert.issuer().to_string();
        let validity = cert.validity().into();
        Ok(Self {
            serial,
            subject,
            common_name,
            issuer,
            validity,
            raw_bytes: der_bytes,
        })
    }
}

impl ParsedX509Certificate {
    pub fn as_der_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: time::OffsetDateTime,
    pub not_after: time::OffsetDateTime,
}

impl From<&x509_parser::certificate::Validity> for Validity {
    fn from(value: &x509_parser::certificate::Validity) -> Self {
        Self {
            not_before: value.not_before.to_datetime(),
            not_after: value.not_after.to_datetime(),
        }
    }
}
