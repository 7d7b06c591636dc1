//! The text-generation capability and its retry policy.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Per-call knobs. The model id is fixed when a backend is constructed.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl GenerateOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            temperature: None,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Backend call failures, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::RateLimited | BackendError::Transport(_) => {
                true
            }
            BackendError::Api { status, .. } => *status >= 500,
            BackendError::Malformed(_) => false,
        }
    }
}

/// Opaque prompted-completion capability. Model-level refusals come back as
/// empty strings, never as errors; errors mean the transport or API failed.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        opts: &GenerateOptions,
    ) -> Result<String, BackendError>;
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Call the backend with the per-call timeout and exponential backoff on
/// transient failures (1s, 2s between the three attempts). Non-transient
/// errors return immediately.
pub async fn generate_with_retry(
    backend: &dyn TextBackend,
    system: &str,
    user: &str,
    opts: &GenerateOptions,
) -> Result<String, BackendError> {
    let mut last_error = None;
    for attempt in 0..RETRY_ATTEMPTS {
        let result = tokio::time::timeout(opts.timeout, backend.generate(system, user, opts)).await;
        match result {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => {
                warn!(attempt = attempt + 1, error = %e, "backend call failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(attempt = attempt + 1, timeout = ?opts.timeout, "backend call timed out");
                last_error = Some(BackendError::Timeout(opts.timeout));
            }
        }
        if attempt + 1 < RETRY_ATTEMPTS {
            let backoff = RETRY_BASE * 2u32.pow(attempt);
            tokio::time::sleep(backoff).await;
        }
    }
    Err(last_error.unwrap_or_else(|| BackendError::Transport("retry attempts exhausted".into())))
}

/// Strip an optional markdown code fence from a model response.
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
