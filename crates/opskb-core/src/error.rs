//! Error taxonomy for the knowledge pipeline.
//!
//! Store and orchestration code returns [`anyhow::Result`]; the variants
//! here travel inside those errors so surfaces (CLI, HTTP) can recover the
//! category with `downcast_ref::<KbError>()`.
//!
//! Per-file ingestion failures are not errors at this level: they are
//! recorded as [`IngestOutcome::Failed`](crate::models::IngestOutcome::Failed).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    /// A required credential or setting is missing. Fatal at the call site.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding API failed (network, auth, non-2xx, or malformed body).
    #[error("embedding provider '{provider}' failed: {message}")]
    EmbeddingProvider { provider: String, message: String },

    /// The text-generation API returned a non-success status.
    #[error("generation provider '{provider}' returned {status}: {body}")]
    GenerationProvider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An embedding's length disagrees with the configured model dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl KbError {
    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        KbError::EmbeddingProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from a remote provider rather than local input
    /// or configuration.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            KbError::EmbeddingProvider { .. } | KbError::GenerationProvider { .. }
        )
    }
}
