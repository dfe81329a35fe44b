use std::path::PathBuf;

use thiserror::Error;

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to spawn transcoder: {0}")]
    Spawn(std::io::Error),
}
