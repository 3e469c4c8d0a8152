//! Same-cluster link candidate generation and scoring.
//!
//! Only ordered pairs inside one embedding cluster are considered, so the
//! work is Σ|cluster|² rather than N². Each pair is gated on L2 distance,
//! scored by similarity × target authority, and dropped if the link already
//! exists.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use linkrank_core::{
    defaults, AuthorityResult, Error, LinkEdge, LinkSuggestion, PageEmbedding, Result,
};

use crate::distance::l2_distance;

/// Scoring parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateConfig {
    /// Pairs further apart than this are never suggested.
    pub max_distance: f32,
    pub score_scale: f64,
    /// Suggestions retained after ranking.
    pub persist_limit: usize,
    pub reason: String,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_distance: defaults::MAX_LINK_DISTANCE,
            score_scale: defaults::SCORE_SCALE,
            persist_limit: defaults::SUGGESTION_PERSIST_LIMIT,
            reason: defaults::SUGGESTION_REASON.to_string(),
        }
    }
}

impl CandidateConfig {
    pub fn with_persist_limit(mut self, limit: usize) -> Self {
        self.persist_limit = limit;
        self
    }
}

/// Output of [`generate_candidates`].
#[derive(Debug, Clone, Default)]
pub struct CandidateReport {
    /// Ranked suggestions, at most `persist_limit`.
    pub suggestions: Vec<LinkSuggestion>,
    /// Suggestions that survived every filter, before truncation.
    pub total_generated: usize,
    /// Ordered same-cluster pairs visited.
    pub pairs_evaluated: u64,
    pub clusters: usize,
}

struct Member<'a> {
    page_id: &'a str,
    vector: &'a [f32],
    authority: f64,
}

/// Rank candidate links for a site.
///
/// Fails with `PreconditionMissing` when authority scores or embeddings have
/// not been computed yet. Pages without a cluster id, an embedding or an
/// authority row are left out.
pub fn generate_candidates(
    site_id: &str,
    authority: &[AuthorityResult],
    embeddings: &[PageEmbedding],
    edges: &[LinkEdge],
    config: &CandidateConfig,
) -> Result<CandidateReport> {
    if authority.is_empty() {
        return Err(Error::PreconditionMissing(format!(
            "no authority scores for site {site_id}; run the authority stage first"
        )));
    }
    if embeddings.is_empty() {
        return Err(Error::PreconditionMissing(format!(
            "no embeddings for site {site_id}; run the embed stage first"
        )));
    }

    let authority_by_page: HashMap<&str, f64> = authority
        .iter()
        .map(|a| (a.page_id.as_str(), a.target_authority()))
        .collect();
    let existing: HashSet<(&str, &str)> = edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();

    let mut clusters: BTreeMap<i32, Vec<Member<'_>>> = BTreeMap::new();
    for embedding in embeddings {
        let (Some(cluster), Some(&authority)) = (
            embedding.cluster_id,
            authority_by_page.get(embedding.page_id.as_str()),
        ) else {
            continue;
        };
        if embedding.vector.is_empty() {
            continue;
        }
        clusters.entry(cluster).or_default().push(Member {
            page_id: &embedding.page_id,
            vector: &embedding.vector,
            authority,
        });
    }

    let mut pairs_evaluated = 0u64;
    let mut suggestions = Vec::new();

    for members in clusters.values_mut() {
        members.sort_by(|a, b| a.page_id.cmp(b.page_id));
        members.dedup_by(|a, b| a.page_id == b.page_id);

        for source in members.iter() {
            for target in members.iter() {
                if source.page_id == target.page_id {
                    continue;
                }
                pairs_evaluated += 1;

                let Some(distance) = l2_distance(source.vector, target.vector) else {
                    continue;
                };
                if distance > config.max_distance {
                    continue;
                }
                if existing.contains(&(source.page_id, target.page_id)) {
                    continue;
                }

                let similarity = (1.0 - distance as f64).max(0.0);
                suggestions.push(LinkSuggestion {
                    site_id: site_id.to_string(),
                    from_page_id: source.page_id.to_string(),
                    to_page_id: target.page_id.to_string(),
                    similarity,
                    target_authority: target.authority,
                    score: similarity * target.authority * config.score_scale,
                    reason: config.reason.clone(),
                });
            }
        }
    }

    suggestions.sort_by(|a, b| a.rank_cmp(b));
    let total_generated = suggestions.len();
    suggestions.truncate(config.persist_limit);

    debug!(
        subsystem = "graph",
        component = "candidates",
        op = "generate",
        site_id,
        clusters = clusters.len(),
        pairs_evaluated,
        total_generated,
        retained = suggestions.len(),
        "Candidates scored"
    );

    Ok(CandidateReport {
        suggestions,
        total_generated,
        pairs_evaluated,
        clusters: clusters.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(id: &str, pr: f64, tspr: Option<f64>) -> AuthorityResult {
        AuthorityResult {
            page_id: id.to_string(),
            pr,
            tspr,
            cluster: Some(0),
            inlinks: 0,
        }
    }

    fn emb(id: &str, vector: Vec<f32>, cluster: Option<i32>) -> PageEmbedding {
        PageEmbedding {
            page_id: id.to_string(),
            vector,
            cluster_id: cluster,
        }
    }

    #[test]
    fn test_missing_authority_is_precondition_error() {
        let err = generate_candidates(
            "s",
            &[],
            &[emb("a", vec![0.0], Some(0))],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PreconditionMissing(ref m) if m.contains("authority")));
    }

    #[test]
    fn test_missing_embeddings_is_precondition_error() {
        let err = generate_candidates(
            "s",
            &[auth("a", 0.5, None)],
            &[],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PreconditionMissing(ref m) if m.contains("embed")));
    }

    #[test]
    fn test_tspr_falls_back_to_pr() {
        let report = generate_candidates(
            "s",
            &[auth("a", 0.5, None), auth("b", 0.25, None)],
            &[
                emb("a", vec![0.0], Some(0)),
                emb("b", vec![0.5], Some(0)),
            ],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap();

        let a_to_b = report
            .suggestions
            .iter()
            .find(|s| s.from_page_id == "a")
            .unwrap();
        assert_eq!(a_to_b.target_authority, 0.25);
        assert!((a_to_b.score - 0.5 * 0.25 * 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_unclustered_and_unscored_pages_excluded() {
        let report = generate_candidates(
            "s",
            &[auth("a", 0.5, Some(0.5)), auth("b", 0.5, Some(0.5))],
            &[
                emb("a", vec![0.0], Some(0)),
                emb("b", vec![0.1], None),
                emb("c", vec![0.1], Some(0)),
            ],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap();
        assert!(report.suggestions.is_empty());
        assert_eq!(report.pairs_evaluated, 0);
    }

    #[test]
    fn test_cross_cluster_pairs_never_suggested() {
        let report = generate_candidates(
            "s",
            &[auth("a", 0.5, Some(0.5)), auth("b", 0.5, Some(0.5))],
            &[emb("a", vec![0.0], Some(0)), emb("b", vec![0.0], Some(1))],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap();
        assert!(report.suggestions.is_empty());
        assert_eq!(report.clusters, 2);
    }

    #[test]
    fn test_dimension_mismatch_never_paired() {
        let report = generate_candidates(
            "s",
            &[auth("a", 0.5, Some(0.5)), auth("b", 0.5, Some(0.5))],
            &[
                emb("a", vec![0.0], Some(0)),
                emb("b", vec![0.0, 0.0], Some(0)),
            ],
            &[],
            &CandidateConfig::default(),
        )
        .unwrap();
        assert!(report.suggestions.is_empty());
        assert_eq!(report.pairs_evaluated, 2);
    }

    #[test]
    fn test_persist_limit_truncates_but_counts_all() {
        let ids: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let authority: Vec<_> = ids.iter().map(|id| auth(id, 0.2, Some(0.2))).collect();
        let embeddings: Vec<_> = ids.iter().map(|id| emb(id, vec![0.0], Some(0))).collect();

        let report = generate_candidates(
            "s",
            &authority,
            &embeddings,
            &[],
            &CandidateConfig::default().with_persist_limit(3),
        )
        .unwrap();
        assert_eq!(report.total_generated, 20);
        assert_eq!(report.suggestions.len(), 3);
    }
}
