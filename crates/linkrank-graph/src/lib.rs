//! # linkrank-graph
//!
//! Pure, synchronous algorithms of the link recommendation pipeline:
//!
//! - [`authority`]: PageRank and cluster-sensitive PageRank (TSPR)
//! - [`clustering`]: k-means cluster assignment over page embeddings
//! - [`candidates`]: same-cluster candidate generation and scoring
//!
//! Nothing here performs I/O; stage handlers load inputs from the stores,
//! call into this crate, and write the results back.

pub mod authority;
pub mod candidates;
pub mod clustering;
pub mod distance;

pub use authority::{compute_authority, AuthorityConfig, AuthorityNode, AuthorityReport};
pub use candidates::{generate_candidates, CandidateConfig, CandidateReport};
pub use clustering::{assign_clusters, ClusteringReport, KMeansConfig};
pub use distance::l2_distance;
