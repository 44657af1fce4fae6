//! Password protected PKCS#12 (`.pfx`) bundles.

use crate::cert::ParsedX509Certificate;
use anyhow::{Context, anyhow, bail};
use p12::PFX;
use std::path::{Path, PathBuf};

pub const BUNDLE_EXTENSION: &str = "pfx";

/// `<directory>/<domain>.pfx`
pub fn bundle_path(directory: &Path, domain: &str) -> PathBuf {
    directory.join(format!("{domain}.{BUNDLE_EXTENSION}"))
}

/// Packs the leaf certificate, its first intermediate (if any) and the PKCS#8 private
/// key into a PKCS#12 container.
pub fn encode(
    chain: &[ParsedX509Certificate],
    private_key_der: &[u8],
    friendly_name: &str,
    password: &str,
) -> anyhow::Result<Vec<u8>> {
    let Some(leaf) = chain.first() else {
        bail!("Certificate chain is empty");
    };
    let intermediate = chain.get(1).map(ParsedX509Certificate::as_der_bytes);
    let pfx = PFX::new(
        leaf.as_der_bytes(),
        private_key_der,
        intermediate,
        password,
        friendly_name,
    )
    .ok_or(anyhow!("Encoding PKCS#12 structure failed"))?;
    Ok(pfx.to_der())
}

/// Opens a bundle and returns every certificate inside it.
pub fn decode(bytes: &[u8], password: &str) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let pfx = PFX::parse(bytes).map_err(|e| anyhow!("Not a PKCS#12 structure: {e:?}"))?;
    if !pfx.verify_mac(password) {
        bail!("Integrity check failed: wrong password or corrupted bundle");
    }
    let certificates = pfx
        .cert_x509_bags(password)
        .map_err(|e| anyhow!("Decrypting certificates failed: {e:?}"))?;
    certificates
        .into_iter()
        .map(|der| ParsedX509Certificate::try_from(der).context("Bundle contains an invalid certificate"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{SubjectInfo, certificate_params, load_certificates_from_memory, new_certificate_key};
    use time::macros::datetime;

    fn self_signed(common_name: &str, not_after: time::OffsetDateTime) -> anyhow::Result<(ParsedX509Certificate, rcgen::KeyPair)> {
        let key = new_certificate_key()?;
        let mut params = certificate_params(&SubjectInfo {
            country: "DE".to_string(),
            state: String::new(),
            locality: String::new(),
            organization: String::new(),
            unit: String::new(),
            common_name: common_name.to_string(),
        })?;
        params.not_after = not_after;
        let cert = params.self_signed(&key)?;
        let mut parsed = load_certificates_from_memory(cert.pem(), None)?;
        Ok((parsed.remove(0), key))
    }

    #[test]
    fn test_bundle_path() {
        assert_eq!(
            bundle_path(Path::new("/etc/certs"), "example.com"),
            PathBuf::from("/etc/certs/example.com.pfx")
        );
    }

    #[test]
    fn test_encoded_bundle_keeps_expiry_and_common_name() -> anyhow::Result<()> {
        let (leaf, key) = self_signed("example.com", datetime!(2031-02-03 04:05:06 UTC))?;
        let bytes = encode(&[leaf.clone()], &key.serialize_der(), "example.com", "hunter2")?;

        let decoded = decode(&bytes, "hunter2")?;
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].validity.not_after, datetime!(2031-02-03 04:05:06 UTC));
        assert_eq!(decoded[0].common_name.as_deref(), Some("example.com"));
        assert_eq!(decoded[0], leaf);
        Ok(())
    }

    #[test]
    fn test_intermediate_is_bundled() -> anyhow::Result<()> {
        let (leaf, key) = self_signed("example.com", datetime!(2031-02-03 04:05:06 UTC))?;
        let (intermediate, _) = self_signed("Fake Intermediate", datetime!(2032-01-01 00:00:00 UTC))?;
        let bytes = encode(&[leaf, intermediate], &key.serialize_der(), "example.com", "pw")?;

        let mut names: Vec<_> = decode(&bytes, "pw")?
            .into_iter()
            .filter_map(|cert| cert.common_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Fake Intermediate".to_string(), "example.com".to_string()]);
        Ok(())
    }

    #[test]
    fn test_wrong_password_is_rejected() -> anyhow::Result<()> {
        let (leaf, key) = self_signed("example.com", datetime!(2031-02-03 04:05:06 UTC))?;
        let bytes = encode(&[leaf], &key.serialize_der(), "example.com", "right")?;
        assert!(decode(&bytes, "wrong").is_err());
        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(b"definitely not DER", "pw").is_err());
    }

    #[test]
    fn test_empty_chain_is_rejected() -> anyhow::Result<()> {
        let key = new_certificate_key()?;
        assert!(encode(&[], &key.serialize_der(), "example.com", "pw").is_err());
        Ok(())
    }
}
