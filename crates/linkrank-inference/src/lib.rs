//! # linkrank-inference
//!
//! Embedding backends for the linkrank EMBED stage.
//!
//! The embedding model is an external collaborator: text goes in, a
//! fixed-dimension vector comes out. This crate provides:
//! - An Ollama-compatible HTTP backend (default feature `ollama`)
//! - A deterministic mock backend for tests (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use linkrank_core::EmbeddingBackend;
//! use linkrank_inference::OllamaEmbedder;
//!
//! # async fn run() -> linkrank_core::Result<()> {
//! let backend = OllamaEmbedder::from_env()?;
//! let vectors = backend.embed_texts(&["Hello".to_string()]).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaEmbedder};

#[cfg(feature = "mock")]
pub use mock::MockEmbedder;

// Re-export the backend trait so callers need only this crate.
pub use linkrank_core::EmbeddingBackend;
