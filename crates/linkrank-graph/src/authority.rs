//! Authority propagation over a site's link graph.
//!
//! score(p) = (1 − d)·r(p) + d·Σ score(q)·w(q→p)/out(q)
//!
//! where r is the restart distribution: uniform over all pages for PR,
//! uniform over the page's cluster for TSPR. Dangling mass is not
//! redistributed, so a page with no inbound links keeps only its restart
//! share.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use linkrank_core::{defaults, AuthorityResult, LinkEdge};

/// Propagation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthorityConfig {
    pub damping: f64,
    pub max_iterations: usize,
    /// L1 change between iterations below which the run has converged.
    pub tolerance: f64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            damping: defaults::DAMPING_FACTOR,
            max_iterations: defaults::AUTHORITY_MAX_ITERATIONS,
            tolerance: defaults::AUTHORITY_TOLERANCE,
        }
    }
}

impl AuthorityConfig {
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// A page participating in propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityNode<'a> {
    pub page_id: &'a str,
    pub cluster: Option<i32>,
}

/// Output of [`compute_authority`].
#[derive(Debug, Clone, Default)]
pub struct AuthorityReport {
    /// One row per page, ordered by page id.
    pub scores: Vec<AuthorityResult>,
    /// Iterations used by the global PR run.
    pub iterations: usize,
    /// Whether the PR run and every TSPR run converged within the cap.
    pub converged: bool,
}

struct Graph {
    /// inbound[p] = (q, w(q→p))
    inbound: Vec<Vec<(usize, f64)>>,
    out_weight: Vec<f64>,
}

impl Graph {
    fn build(index: &HashMap<&str, usize>, edges: &[LinkEdge]) -> Self {
        let n = index.len();
        let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();

        for edge in edges {
            let (Some(&src), Some(&dst)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) else {
                continue;
            };
            if src == dst || !edge.weight.is_finite() || edge.weight <= 0.0 {
                continue;
            }
            *weights.entry((src, dst)).or_insert(0.0) += edge.weight;
        }

        let mut inbound = vec![Vec::new(); n];
        let mut out_weight = vec![0.0; n];
        for ((src, dst), w) in weights {
            inbound[dst].push((src, w));
            out_weight[src] += w;
        }
        Self {
            inbound,
            out_weight,
        }
    }

    fn inlink_counts(&self) -> Vec<i64> {
        self.inbound
            .iter()
            .map(|sources| {
                let distinct: HashSet<usize> = sources.iter().map(|(q, _)| *q).collect();
                distinct.len() as i64
            })
            .collect()
    }

    /// Iterate from the uniform 1/N start. Returns (scores, iterations, converged).
    fn propagate(&self, restart: &[f64], config: &AuthorityConfig) -> (Vec<f64>, usize, bool) {
        let n = restart.len();
        let d = config.damping;
        let mut scores = vec![1.0 / n as f64; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < config.max_iterations {
            iterations += 1;
            let next: Vec<f64> = (0..n)
                .map(|p| {
                    let incoming: f64 = self.inbound[p]
                        .iter()
                        .map(|&(q, w)| scores[q] * w / self.out_weight[q])
                        .sum();
                    (1.0 - d) * restart[p] + d * incoming
                })
                .collect();

            let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
            scores = next;
            if delta < config.tolerance {
                converged = true;
                break;
            }
        }

        (scores, iterations, converged)
    }
}

/// Compute PR, TSPR and inlink counts for every page.
///
/// Edges with unknown endpoints, self-loops and non-positive weights are
/// ignored. Pages without a cluster get `tspr = None`. An empty page set
/// yields an empty report.
pub fn compute_authority(
    pages: &[AuthorityNode<'_>],
    edges: &[LinkEdge],
    config: &AuthorityConfig,
) -> AuthorityReport {
    let mut nodes: Vec<AuthorityNode<'_>> = pages.to_vec();
    nodes.sort_by(|a, b| a.page_id.cmp(b.page_id));
    nodes.dedup_by(|a, b| a.page_id == b.page_id);

    if nodes.is_empty() {
        return AuthorityReport {
            scores: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let n = nodes.len();
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.page_id, i))
        .collect();
    let graph = Graph::build(&index, edges);

    let uniform = vec![1.0 / n as f64; n];
    let (pr, iterations, mut converged) = graph.propagate(&uniform, config);

    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if let Some(cluster) = node.cluster {
            members.entry(cluster).or_default().push(i);
        }
    }

    let mut tspr: Vec<Option<f64>> = vec![None; n];
    for (cluster, idxs) in &members {
        let share = 1.0 / idxs.len() as f64;
        let mut restart = vec![0.0; n];
        for &i in idxs {
            restart[i] = share;
        }
        let (scores, cluster_iterations, cluster_converged) = graph.propagate(&restart, config);
        converged &= cluster_converged;
        for &i in idxs {
            tspr[i] = Some(scores[i]);
        }
        debug!(
            subsystem = "graph",
            component = "authority",
            op = "tspr",
            cluster,
            members = idxs.len(),
            iterations = cluster_iterations,
            converged = cluster_converged,
            "Cluster-sensitive run finished"
        );
    }

    let inlinks = graph.inlink_counts();
    let scores = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| AuthorityResult {
            page_id: node.page_id.to_string(),
            pr: pr[i],
            tspr: tspr[i],
            cluster: node.cluster,
            inlinks: inlinks[i],
        })
        .collect();

    AuthorityReport {
        scores,
        iterations,
        converged,
    }
}
