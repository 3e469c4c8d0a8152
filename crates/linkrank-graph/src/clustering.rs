//! Topical cluster assignment with k-means.
//!
//! Inputs are sorted by page id and centroids are seeded with k-means++ from
//! a fixed-seed RNG, so identical embeddings always produce identical
//! assignments. Cluster ids are renumbered by first appearance over the
//! sorted page ids; they only scope a single run.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use linkrank_core::{defaults, ClusterAssignment, Error, PageEmbedding, Result};

use crate::distance::squared_l2;

/// Configuration for k-means clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    /// Number of clusters (k). Capped at the number of usable vectors.
    pub k: usize,
    pub max_iterations: usize,
    /// Iteration stops when no centroid moves further than this.
    pub convergence_threshold: f32,
    pub seed: u64,
}

impl KMeansConfig {
    /// Create a validated configuration.
    pub fn new(k: usize, max_iterations: usize, convergence_threshold: f32) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be > 0".to_string()));
        }
        if max_iterations == 0 {
            return Err(Error::InvalidInput("max_iterations must be > 0".to_string()));
        }
        if !convergence_threshold.is_finite() || convergence_threshold <= 0.0 {
            return Err(Error::InvalidInput(
                "convergence_threshold must be a finite positive number".to_string(),
            ));
        }
        Ok(Self {
            k,
            max_iterations,
            convergence_threshold,
            seed: defaults::KMEANS_SEED,
        })
    }

    /// Default iteration cap and threshold for the given k.
    pub fn with_k(k: usize) -> Result<Self> {
        Self::new(k, defaults::KMEANS_MAX_ITERATIONS, 1e-6)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: defaults::CLUSTER_COUNT,
            max_iterations: defaults::KMEANS_MAX_ITERATIONS,
            convergence_threshold: 1e-6,
            seed: defaults::KMEANS_SEED,
        }
    }
}

/// Output of [`assign_clusters`].
#[derive(Debug, Clone, Default)]
pub struct ClusteringReport {
    /// One assignment per usable page, ordered by page id.
    pub assignments: Vec<ClusterAssignment>,
    /// Number of clusters actually formed.
    pub k: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Pages skipped for an empty, non-finite or off-dimension vector.
    pub excluded: usize,
}

/// Most common vector length; ties go to the larger dimension.
fn dominant_dimension(embeddings: &[PageEmbedding]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for e in embeddings.iter().filter(|e| !e.vector.is_empty()) {
        *counts.entry(e.vector.len()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(dim, count)| (count, dim))
        .map(|(dim, _)| dim)
}

fn nearest(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist = squared_l2(vector, centroid).unwrap_or(f32::INFINITY);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

/// k-means++ seeding: first centroid uniform, then proportional to D².
/// Stops early when every remaining point coincides with a centroid.
fn kmeans_plus_plus_init(vectors: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(vectors[rng.gen_range(0..n)].to_vec());

    let mut min_distances = vec![f32::INFINITY; n];
    while centroids.len() < k {
        let Some(last) = centroids.last() else {
            break;
        };
        for (i, vector) in vectors.iter().enumerate() {
            let dist = squared_l2(vector, last).unwrap_or(f32::INFINITY);
            if dist < min_distances[i] {
                min_distances[i] = dist;
            }
        }

        let total: f64 = min_distances.iter().map(|&d| d as f64).sum();
        if total <= 0.0 {
            break;
        }

        let mut target = rng.gen::<f64>() * total;
        let mut chosen = n - 1;
        for (i, &d) in min_distances.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            target -= d as f64;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        // Guard against rounding landing on a zero-distance tail point.
        if min_distances[chosen] <= 0.0 {
            match min_distances.iter().rposition(|&d| d > 0.0) {
                Some(i) => chosen = i,
                None => break,
            }
        }
        centroids.push(vectors[chosen].to_vec());
    }

    centroids
}

/// Mean of assigned points; an empty cluster keeps its previous centroid.
fn compute_centroids(
    vectors: &[&[f32]],
    assignments: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dim = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f64; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (vector, &cluster) in vectors.iter().zip(assignments) {
        counts[cluster] += 1;
        for (acc, &x) in sums[cluster].iter_mut().zip(vector.iter()) {
            *acc += x as f64;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                sum.into_iter().map(|s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}

/// Partition pages into at most `config.k` clusters.
pub fn assign_clusters(embeddings: &[PageEmbedding], config: &KMeansConfig) -> ClusteringReport {
    let Some(dim) = dominant_dimension(embeddings) else {
        return ClusteringReport {
            excluded: embeddings.len(),
            converged: true,
            ..ClusteringReport::default()
        };
    };

    let mut usable: Vec<&PageEmbedding> = embeddings
        .iter()
        .filter(|e| e.vector.len() == dim && e.vector.iter().all(|x| x.is_finite()))
        .collect();
    usable.sort_by(|a, b| a.page_id.cmp(&b.page_id));
    usable.dedup_by(|a, b| a.page_id == b.page_id);
    let excluded = embeddings.len() - usable.len();
    if usable.is_empty() {
        return ClusteringReport {
            excluded,
            converged: true,
            ..ClusteringReport::default()
        };
    }

    let vectors: Vec<&[f32]> = usable.iter().map(|e| e.vector.as_slice()).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = kmeans_plus_plus_init(&vectors, config.k.min(vectors.len()), &mut rng);

    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;
        for (i, vector) in vectors.iter().enumerate() {
            assignments[i] = nearest(vector, &centroids);
        }

        let next = compute_centroids(&vectors, &assignments, &centroids);
        let max_movement = centroids
            .iter()
            .zip(&next)
            .map(|(old, new)| squared_l2(old, new).unwrap_or(0.0).sqrt())
            .fold(0.0f32, f32::max);
        centroids = next;

        if max_movement < config.convergence_threshold {
            converged = true;
            break;
        }
    }

    // Final assignment against the settled centroids, then renumber.
    for (i, vector) in vectors.iter().enumerate() {
        assignments[i] = nearest(vector, &centroids);
    }
    let mut renumber: HashMap<usize, i32> = HashMap::new();
    let assignments: Vec<ClusterAssignment> = usable
        .iter()
        .zip(&assignments)
        .map(|(embedding, &raw)| {
            let next_id = renumber.len() as i32;
            let cluster_id = *renumber.entry(raw).or_insert(next_id);
            ClusterAssignment {
                page_id: embedding.page_id.clone(),
                cluster_id,
            }
        })
        .collect();

    debug!(
        subsystem = "graph",
        component = "clustering",
        op = "assign_clusters",
        pages = assignments.len(),
        excluded,
        k = renumber.len(),
        iterations,
        converged,
        "k-means finished"
    );

    ClusteringReport {
        k: renumber.len(),
        assignments,
        iterations,
        converged,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(id: &str, vector: Vec<f32>) -> PageEmbedding {
        PageEmbedding {
            page_id: id.to_string(),
            vector,
            cluster_id: None,
        }
    }

    fn two_groups() -> Vec<PageEmbedding> {
        vec![
            emb("a1", vec![0.0, 0.0]),
            emb("a2", vec![0.1, 0.0]),
            emb("a3", vec![0.0, 0.1]),
            emb("b1", vec![10.0, 10.0]),
            emb("b2", vec![10.1, 10.0]),
            emb("b3", vec![10.0, 10.1]),
        ]
    }

    fn cluster_of(report: &ClusteringReport, id: &str) -> i32 {
        report
            .assignments
            .iter()
            .find(|a| a.page_id == id)
            .map(|a| a.cluster_id)
            .expect("page assigned")
    }

    #[test]
    fn test_kmeans_config_invalid_k_zero() {
        assert!(KMeansConfig::new(0, 10, 1e-6).is_err());
    }

    #[test]
    fn test_kmeans_config_invalid_threshold() {
        assert!(KMeansConfig::new(3, 10, 0.0).is_err());
        assert!(KMeansConfig::new(3, 10, f32::NAN).is_err());
        assert!(KMeansConfig::new(3, 0, 1e-6).is_err());
    }

    #[test]
    fn test_kmeans_config_default_uses_cluster_count() {
        assert_eq!(KMeansConfig::default().k, defaults::CLUSTER_COUNT);
    }

    #[test]
    fn test_empty_input() {
        let report = assign_clusters(&[], &KMeansConfig::default());
        assert!(report.assignments.is_empty());
        assert_eq!(report.k, 0);
    }

    #[test]
    fn test_distinct_groups_separate() {
        let config = KMeansConfig::with_k(2).unwrap();
        let report = assign_clusters(&two_groups(), &config);

        assert_eq!(report.k, 2);
        assert_eq!(cluster_of(&report, "a1"), cluster_of(&report, "a2"));
        assert_eq!(cluster_of(&report, "a1"), cluster_of(&report, "a3"));
        assert_eq!(cluster_of(&report, "b1"), cluster_of(&report, "b3"));
        assert_ne!(cluster_of(&report, "a1"), cluster_of(&report, "b1"));
    }

    #[test]
    fn test_ids_renumbered_by_first_appearance() {
        let config = KMeansConfig::with_k(2).unwrap();
        let report = assign_clusters(&two_groups(), &config);
        assert_eq!(cluster_of(&report, "a1"), 0);
        assert_eq!(cluster_of(&report, "b1"), 1);
    }

    #[test]
    fn test_deterministic_across_runs_and_input_order() {
        let config = KMeansConfig::with_k(2).unwrap();
        let first = assign_clusters(&two_groups(), &config);
        let mut shuffled = two_groups();
        shuffled.reverse();
        let second = assign_clusters(&shuffled, &config);
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn test_k_capped_by_page_count() {
        let pages = vec![emb("a", vec![0.0]), emb("b", vec![5.0])];
        let report = assign_clusters(&pages, &KMeansConfig::with_k(5).unwrap());
        assert_eq!(report.assignments.len(), 2);
        assert_eq!(report.k, 2);
    }

    #[test]
    fn test_identical_vectors_share_one_cluster() {
        let pages = vec![
            emb("a", vec![1.0, 1.0]),
            emb("b", vec![1.0, 1.0]),
            emb("c", vec![1.0, 1.0]),
        ];
        let report = assign_clusters(&pages, &KMeansConfig::with_k(3).unwrap());
        assert_eq!(report.k, 1);
        assert!(report.assignments.iter().all(|a| a.cluster_id == 0));
    }

    #[test]
    fn test_unusable_vectors_excluded() {
        let pages = vec![
            emb("a", vec![0.0, 0.0]),
            emb("b", vec![0.1, 0.1]),
            emb("empty", vec![]),
            emb("short", vec![1.0]),
            emb("nan", vec![f32::NAN, 0.0]),
        ];
        let report = assign_clusters(&pages, &KMeansConfig::with_k(2).unwrap());
        assert_eq!(report.excluded, 3);
        let ids: Vec<_> = report.assignments.iter().map(|a| a.page_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_every_usable_page_gets_exactly_one_cluster() {
        let pages: Vec<_> = (0..40)
            .map(|i| emb(&format!("p{i:02}"), vec![(i % 4) as f32 * 3.0, (i % 7) as f32]))
            .collect();
        let report = assign_clusters(&pages, &KMeansConfig::default());
        assert_eq!(report.assignments.len(), 40);
        assert!(report.k <= defaults::CLUSTER_COUNT);
        assert!(report
            .assignments
            .iter()
            .all(|a| (a.cluster_id as usize) < report.k));
    }
}
