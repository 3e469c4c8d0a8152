//! # linkrank-core
//!
//! Core types, traits, and abstractions for the linkrank internal-link
//! recommendation pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the store, algorithm, worker, and API crates depend on.

pub mod defaults;
pub mod error;
pub mod models;
pub mod page_id;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use page_id::{page_id_for_url, url_for_page_id};
pub use traits::*;

/// Re-export of the pgvector vector type used for page embeddings.
pub use pgvector::Vector;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
