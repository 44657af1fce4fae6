use crate::bundle;
use crate::error::{RenewalError, RenewalResult};
use crate::time::format_date;
use std::io::ErrorKind;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Renewal starts once any certificate in the bundle expires within this window.
pub const RENEWAL_WINDOW: Duration = Duration::days(7);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryStatus {
    pub due: bool,
    /// Earliest not-after of the bundle, if it held any certificate.
    pub not_after: Option<OffsetDateTime>,
}

impl ExpiryStatus {
    /// `dd-MM-yyyy`, or an empty string when there is nothing to show.
    pub fn display_not_after(&self) -> String {
        self.not_after.map(format_date).unwrap_or_default()
    }
}

pub async fn check_expiry(bundle_path: &Path, password: &str) -> RenewalResult<ExpiryStatus> {
    check_expiry_at(bundle_path, password, OffsetDateTime::now_utc()).await
}

/// Decides whether the bundle at `bundle_path` needs renewing as of `now`.
///
/// A missing file is due for first issuance. Otherwise every certificate inside is
/// inspected and a single one expiring within [`RENEWAL_WINDOW`] makes the whole
/// bundle due. A bundle without certificates is due as well.
pub async fn check_expiry_at(
    bundle_path: &Path,
    password: &str,
    now: OffsetDateTime,
) -> RenewalResult<ExpiryStatus> {
    let bytes = match tokio::fs::read(bundle_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No bundle at {}, first issuance required", bundle_path.display());
            return Ok(ExpiryStatus {
                due: true,
                not_after: None,
            });
        }
        Err(e) => return Err(RenewalError::io("Reading certificate bundle", bundle_path, e)),
    };
    let certificates =
        bundle::decode(&bytes, password).map_err(|reason| RenewalError::BundleDecode {
            path: bundle_path.to_path_buf(),
            reason,
        })?;

    let threshold = now + RENEWAL_WINDOW;
    let not_after = certificates
        .iter()
        .map(|cert| cert.validity.not_after)
        .min();
    for cert in &certificates {
        debug!(
            "Bundle certificate {} (serial {:x}) expires {}",
            cert.subject, cert.serial, cert.validity.not_after
        );
    }
    let due = match not_after {
        Some(earliest) => earliest < threshold,
        None => true,
    };
    Ok(ExpiryStatus { due, not_after })
}
