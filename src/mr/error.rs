use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Staging-store failures (`Io`, `NotFound`) are recoverable from the job's
/// point of view: the worker logs them and goes back to fetching, and the
/// coordinator requeues the abandoned lease once it times out. The remaining
/// variants are fatal to their caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("staging store i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A logical file name that is absent from the index, or whose published
    /// file is missing on disk.
    #[error("no published file named `{0}`")]
    NotFound(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("job did not complete within {0:?}")]
    Timeout(Duration),
}
