use std::sync::Arc;

use reqwest::StatusCode;

/// Represents a result type for operations in the Featurevisor SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Featurevisor SDK.
///
/// Evaluation never produces an `Error`: missing features, segments or variables are reported
/// through [`EvaluationReason`](crate::EvaluationReason) instead. Errors only come from client
/// construction and datafile fetching.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Neither an inline datafile nor a datafile URL was provided.
    #[error("either `datafile` or `datafile_url` is required")]
    MissingDatafile,

    /// Refreshing was requested but no datafile URL was configured.
    #[error("refreshing requires `datafile_url`")]
    MissingDatafileUrl,

    /// The datafile has not been loaded and no load is in progress.
    #[error("datafile is not loaded")]
    NotReady,

    /// Datafile URL could not be parsed.
    #[error("invalid datafile_url configuration")]
    InvalidDatafileUrl(#[source] url::ParseError),

    /// Datafile server responded with a non-2xx status.
    #[error("unexpected status while fetching datafile: {0}")]
    UnexpectedStatus(StatusCode),

    /// Datafile payload is not a valid datafile.
    #[error("error parsing datafile")]
    DatafileParse(#[source] Arc<serde_json::Error>),

    /// A refresh was requested while another one was still running.
    #[error("datafile refresh is already in progress")]
    RefreshInProgress,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
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
        Error::DatafileParse(Arc::new(value))
    }
}
