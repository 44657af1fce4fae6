use crate::acme::EngineError;
use std::path::PathBuf;

pub type RenewalResult<T> = Result<T, RenewalError>;

/// Everything that can abort one renewal cycle.
///
/// None of these are fatal to the process: the supervisor logs them and tries again
/// after the configured delay.
#[derive(Debug, thiserror::Error)]
pub enum RenewalError {
    #[error("Could not open certificate bundle {}: {reason:#}", path.display())]
    BundleDecode { path: PathBuf, reason: anyhow::Error },
    #[error("Could not build certificate bundle: {0:#}")]
    BundleEncode(anyhow::Error),
    #[error("{operation} failed: {error}")]
    Ca {
        operation: &'static str,
        #[source]
        error: EngineError,
    },
    #[error("Domain {domain} failed validation: {detail}")]
    ValidationFailed { domain: String, detail: String },
    #[error("Domain {domain} was still not validated after {attempts} validation requests")]
    ValidationTimeout { domain: String, attempts: u32 },
    #[error("Generating certificate key failed: {0:#}")]
    KeyGeneration(anyhow::Error),
    #[error("{operation} {}: {error}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl RenewalError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        RenewalError::Io {
            operation,
            path: path.into(),
            error,
        }
    }

}

/// Attaches the name of the ACME operation to an engine failure.
pub trait EngineContext<T> {
    fn during(self, operation: &'static str) -> RenewalResult<T>;
}

impl<T> EngineContext<T> for Result<T, EngineError> {
    fn during(self, operation: &'static str) -> RenewalResult<T> {
        self.map_err(|error| RenewalError::Ca { operation, error })
    }
}
