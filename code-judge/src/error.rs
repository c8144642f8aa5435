use std::time::Duration;
use thiserror::Error;

/// Failures produced while judging a submission.
///
/// The `Display` text of `Compile`, `Runtime` and `Timeout` is what ends up in
/// the `error` field of a failed [`ExecutionResult`](crate::ExecutionResult).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Compile Error: {0}")]
    Compile(String),

    #[error("Runtime Error: {0}")]
    Runtime(String),

    #[error("Timeout Error: exceeded {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Internal Error: {0}")]
    Internal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure belongs to a single test case rather than the whole job.
    pub fn is_verdict(&self) -> bool {
        matches!(self, Error::Runtime(_) | Error::Timeout(_))
    }

    /// Whether the caller sent something we cannot judge, as opposed to the
    /// judge itself being broken.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::UnsupportedLanguage(_))
    }
}
