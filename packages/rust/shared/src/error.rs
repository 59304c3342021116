//! The Backfeed error type.
//!
//! A sender's mistake (bad URL, missing backlink, unknown post) is not an
//! error here; the core reports those as rejection reasons. `BackfeedError`
//! covers what the operator has to look at: bad config, an unreachable
//! network, a failing database, a broken event subscriber.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BackfeedError {
    #[error("config error: {message}")]
    Config { message: String },

    /// Building the HTTP client, binding the listener, or serving.
    #[error("network error: {0}")]
    Network(String),

    /// libSQL failures, missing rows after a write, writes in read-only mode.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value that parsed but makes no sense, e.g. an unknown mention type
    /// read back from the database.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Returned by an event handler; the bus logs it and moves on.
    #[error("event handler error: {0}")]
    Event(String),
}

pub type Result<T> = std::result::Result<T, BackfeedError>;

impl BackfeedError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Attach the path that was being read or written.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
