//! Typed run errors, each mapped to a process exit code.

use thiserror::Error;

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_BACKEND: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 4;

/// Fatal errors that end a run. Anything recoverable (transient backend
/// failures, parse fallbacks, partial groups) is handled in place and only
/// surfaces in the generation statistics.
#[derive(Debug, Error)]
pub enum RunError {
    /// Invalid configuration, seeds, or pools.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend produced nothing usable on the initial generation.
    #[error("unrecoverable backend failure on the initial generation: {0}")]
    Backend(String),

    /// The run stopped early with partial results persisted.
    #[error("run interrupted: {0}")]
    Interrupted(String),

    /// A store read or write failed; stats were flushed before exiting.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => EXIT_CONFIG,
            RunError::Backend(_) => EXIT_BACKEND,
            RunError::Interrupted(_) => EXIT_INTERRUPTED,
            RunError::Store(_) => EXIT_INTERRUPTED,
        }
    }
}
