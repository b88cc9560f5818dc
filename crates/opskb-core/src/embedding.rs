//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, input preparation shared by every backend, and pure helpers
//! for vector serialization and similarity computation.
//!
//! Concrete HTTP providers (OpenAI-compatible, Ollama) and the throttled
//! batch driver live in the `opskb` app crate.

use async_trait::async_trait;

use crate::error::KbError;

/// Character cap applied to every input before it is sent to a provider.
/// A character-based stand-in for the model's token limit.
pub const MAX_INPUT_CHARS: usize = 30_000;

/// Largest number of inputs a provider accepts in one request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 2048;

/// A remote (or local) text → vector model.
///
/// Instances are built once at startup and shared by reference; they carry
/// no caching. A single [`embed_request`](EmbeddingProvider::embed_request)
/// call must never receive more than [`max_batch_size`](EmbeddingProvider::max_batch_size)
/// inputs.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier used in errors and logs (e.g. `"openai"`).
    fn name(&self) -> &str;
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Output dimensionality of the model (e.g. `1536`).
    fn dims(&self) -> usize;
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }
    /// Embed already-prepared inputs in one provider call, returning one
    /// vector per input in input order.
    async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError>;
}

/// Validate and truncate one input.
///
/// Empty (or whitespace-only) text is rejected; text longer than
/// [`MAX_INPUT_CHARS`] is cut on a character boundary.
pub fn prepare_input(text: &str) -> Result<String, KbError> {
    if text.trim().is_empty() {
        return Err(KbError::InvalidInput(
            "cannot embed empty text".to_string(),
        ));
    }
    Ok(truncate_chars(text, MAX_INPUT_CHARS).to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Check a provider response against the request and the model dimension.
pub fn check_response(
    provider: &dyn EmbeddingProvider,
    requested: usize,
    vectors: &[Vec<f32>],
) -> Result<(), KbError> {
    if vectors.len() != requested {
        return Err(KbError::embedding(
            provider.name(),
            format!(
                "expected {} embeddings, received {}",
                requested,
                vectors.len()
            ),
        ));
    }
    let expected = provider.dims();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(KbError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Embed a single text (e.g. a search query).
pub async fn embed(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>, KbError> {
    let input = prepare_input(text)?;
    let vectors = provider.embed_request(std::slice::from_ref(&input)).await?;
    check_response(provider, 1, &vectors)?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| KbError::embedding(provider.name(), "empty embedding response"))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use opskb_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` when either vector has
/// zero norm, when either is empty, or when the lengths differ.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
