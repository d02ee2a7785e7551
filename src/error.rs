//! Internal error type for fallible governor helpers.
//!
//! Public governor operations never return these; they are logged and turned
//! into zero-effect results at the component boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not available on this host")]
    Unavailable(&'static str),
}

impl GovernorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GovernorError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GovernorError>;
