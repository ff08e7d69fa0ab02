use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

/// Every way a run can abort. None of them are retried inside the run; the
/// watermark is left untouched so the next run covers the same window.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad credentials or settings. Retrying cannot help.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("error retrieving data from the data source: {0}")]
    DataSource(String),
    #[error("error sending data to the metrics backend: {0}")]
    Reporting(String),
    /// The watermark store could not be read or written. Never treated as an
    /// empty store.
    #[error("watermark store error: {0}")]
    Store(String),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
