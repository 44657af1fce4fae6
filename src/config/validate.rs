use super::ConfigurationError;

const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Lowercases and checks a domain name. Wildcards cannot be validated over http-01.
pub(super) fn domain(raw: &str) -> Result<String, ConfigurationError> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let invalid = |reason| ConfigurationError::InvalidDomain {
        domain: raw.to_string(),
        reason,
    };
    if domain.is_empty() {
        return Err(ConfigurationError::Missing("DOMAIN"));
    }
    if domain.starts_with("*.") {
        return Err(invalid("wildcard names need dns-01 validation"));
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(invalid("name too long"));
    }
    if !domain.contains('.') {
        return Err(invalid("not a fully qualified name"));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return Err(invalid("label must be 1 to 63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label must not start or end with a hyphen"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(invalid("only letters, digits and hyphens are allowed"));
        }
    }
    Ok(domain)
}

pub(super) fn email(raw: &str) -> Result<String, ConfigurationError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(ConfigurationError::Missing("ACCOUNT_EMAIL"));
    }
    match email.split_once('@') {
        Some((local, host)) if !local.is_empty() && host.contains('.') && !host.contains('@') => {
            Ok(email.to_string())
        }
        _ => Err(ConfigurationError::InvalidEmail(raw.to_string())),
    }
}

pub(super) fn country(raw: &str) -> Result<String, ConfigurationError> {
    let country = raw.trim();
    if country.is_empty() {
        return Err(ConfigurationError::Missing("CERT_COUNTRY"));
    }
    if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ConfigurationError::InvalidCountry(raw.to_string()));
    }
    Ok(country.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("example.com", "example.com")]
    #[case("WWW.Example.com", "www.example.com")]
    #[case(" sub.example.com. ", "sub.example.com")]
    #[case("xn--bcher-kva.example", "xn--bcher-kva.example")]
    fn test_valid_domains(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(domain(input).unwrap(), expected);
    }

    #[rstest]
    #[case("*.example.com")]
    #[case("localhost")]
    #[case("exa mple.com")]
    #[case("-bad.example.com")]
    #[case("a..example.com")]
    #[case("under_score.example.com")]
    fn test_invalid_domains(#[case] input: &str) {
        assert!(matches!(
            domain(input),
            Err(ConfigurationError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn test_empty_domain_is_missing() {
        assert!(matches!(domain("  "), Err(ConfigurationError::Missing("DOMAIN"))));
    }

    #[rstest]
    #[case("admin@example.com", true)]
    #[case("a.b+c@mail.example.org", true)]
    #[case("admin", false)]
    #[case("@example.com", false)]
    #[case("admin@localhost", false)]
    #[case("a@b@example.com", false)]
    fn test_email(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(email(input).is_ok(), valid);
    }

    #[rstest]
    #[case("nl", Some("NL"))]
    #[case(" US ", Some("US"))]
    #[case("NLD", None)]
    #[case("1A", None)]
    fn test_country(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(country(input).ok().as_deref(), expected);
    }
}
