use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while looking up feature flags.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A required argument (flag name, cache key, encoded query) is missing or blank.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Serialized query could not be decoded.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// Snapshot could not be installed in the registry. Recovered locally by falling back to the
    /// default snapshot.
    #[error("failed to register snapshot {key:?}: {reason}")]
    RegistrationFailed {
        /// Snapshot key that failed to register.
        key: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Flag lookup failed. Carries the original cause.
    #[error("feature lookup failed")]
    LookupFailed(#[source] Arc<Error>),

    /// Flag store was unable to evaluate the flag.
    #[error(transparent)]
    Evaluation(FlagEvaluationError),

    /// Invalid configuration option.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// The lookup worker is no longer accepting work (shut down or panicked).
    #[error("lookup worker stopped")]
    LookupWorkerStopped,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(Arc<serde_json::Error>),
}

impl Error {
    /// Wrap `self` into [`Error::LookupFailed`], unless it already is one.
    pub(crate) fn into_lookup_failure(self) -> Error {
        match self {
            err @ Error::LookupFailed(_) => err,
            err => Error::LookupFailed(Arc::new(err)),
        }
    }
}

/// Errors reported by a flag store while evaluating a flag.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FlagEvaluationError {
    /// Flag definitions have not been fetched yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// The flag definition failed to parse. The rest of the flag table is still usable.
    #[error("error parsing flag configuration")]
    ConfigurationParseError,

    /// The flag store is unreachable.
    #[error("flag store unavailable")]
    StoreUnavailable,
}

impl From<FlagEvaluationError> for Error {
    fn from(value: FlagEvaluationError) -> Self {
        Error::Evaluation(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::{Error, FlagEvaluationError};

    #[test]
    fn lookup_failure_keeps_cause() {
        let err = Error::from(FlagEvaluationError::ConfigurationMissing).into_lookup_failure();

        let Error::LookupFailed(cause) = &err else {
            panic!("expected LookupFailed, got {err:?}");
        };
        assert!(matches!(
            **cause,
            Error::Evaluation(FlagEvaluationError::ConfigurationMissing)
        ));
        assert!(err.source().is_some());
    }

    #[test]
    fn lookup_failure_is_not_nested() {
        let err = Error::Unauthorized.into_lookup_failure().into_lookup_failure();

        let Error::LookupFailed(cause) = err else {
            panic!("expected LookupFailed");
        };
        assert!(matches!(*cause, Error::Unauthorized));
    }
}
