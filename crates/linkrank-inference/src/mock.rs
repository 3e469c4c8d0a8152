//! Mock embedding backend for deterministic testing.
//!
//! Vectors are derived from a BLAKE3 hash of the input text, so the same
//! text always embeds to the same unit vector. Individual texts can be
//! pinned to explicit vectors, and transient failures can be injected to
//! exercise retry paths.
//!
//! ```rust
//! use linkrank_inference::mock::MockEmbedder;
//!
//! let backend = MockEmbedder::new()
//!     .with_dimension(8)
//!     .with_vector("about us", vec![1.0; 8]);
//! assert_eq!(backend.calls(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use linkrank_core::{EmbeddingBackend, Error, Result, Vector};

const MOCK_MODEL: &str = "mock-embed";
const MOCK_DIMENSION: usize = 16;

/// Deterministic embedding backend.
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: usize,
    pinned: Arc<HashMap<String, Vec<f32>>>,
    calls: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: MOCK_DIMENSION,
            pinned: Arc::new(HashMap::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension.max(1);
        self
    }

    /// Always return `vector` for `text`.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.pinned).insert(text.into(), vector);
        self
    }

    /// Fail the next `count` calls with a transient error.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `embed_texts` calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let mut reader = blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof();
        let mut bytes = vec![0u8; self.dimension * 4];
        reader.fill(&mut bytes);

        let raw: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| {
                let n = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (n as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return raw;
        }
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::TransientIo("mock embedder failure".to_string()));
        }

        Ok(texts
            .iter()
            .map(|text| {
                let vector = self
                    .pinned
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.hashed_vector(text));
                Vector::from(vector)
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}
