//! Strict-clique grouping over confirmed pairwise edges.
//!
//! A PR joins a candidate clique only if it has a confirmed duplicate edge
//! to *every* existing member. There is no transitive promotion: confirmed
//! `A↔B` and `B↔C` without `A↔C` never yields `{A, B, C}`. Greedy by
//! descending confidence; recall is preferred over optimal maximum-clique.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Categorical closeness of a confirmed pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    ExactDuplicate,
    NearDuplicate,
    Related,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::ExactDuplicate => "exact_duplicate",
            Relationship::NearDuplicate => "near_duplicate",
            Relationship::Related => "related",
        }
    }
}

/// Verifier verdict for one pair, as returned by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub is_duplicate: bool,
    /// 0.0..=1.0
    pub confidence: f64,
    #[serde(default = "default_relationship")]
    pub relationship: Relationship,
    #[serde(default)]
    pub rationale: String,
}

fn default_relationship() -> Relationship {
    Relationship::Related
}

/// One verified pair.
#[derive(Debug, Clone)]
pub struct PairEdge {
    pub pr_a: i64,
    pub pr_b: i64,
    pub result: VerifyResult,
}

/// A formed duplicate group.
#[derive(Debug, Clone)]
pub struct Clique {
    pub members: Vec<i64>,
    /// Average confidence over all intra-clique edges.
    pub confidence: f64,
    /// Relationship of the seed edge.
    pub relationship: Relationship,
}

/// Forms strict cliques from a confirmed-edge list.
///
/// Edges with `is_duplicate == false` are discarded. Remaining edges are
/// processed in descending confidence (stable for ties). Each PR ends up in
/// at most one clique; cliques are capped at `max_group_size` members and
/// only cliques of size ≥ 2 are returned.
pub fn group_cliques(edges: &[PairEdge], max_group_size: usize) -> Vec<Clique> {
    let confirmed: Vec<&PairEdge> = edges.iter().filter(|e| e.result.is_duplicate).collect();

    // Adjacency over confirmed edges for the all-members check.
    let mut confidence_of: HashMap<(i64, i64), f64> = HashMap::new();
    let mut peers: HashMap<i64, HashSet<i64>> = HashMap::new();
    for edge in &confirmed {
        let key = pair_key(edge.pr_a, edge.pr_b);
        confidence_of.entry(key).or_insert(edge.result.confidence);
        peers.entry(edge.pr_a).or_default().insert(edge.pr_b);
        peers.entry(edge.pr_b).or_default().insert(edge.pr_a);
    }

    let mut ordered = confirmed;
    ordered.sort_by(|a, b| {
        b.result
            .confidence
            .partial_cmp(&a.result.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut used: HashSet<i64> = HashSet::new();
    let mut cliques: Vec<Clique> = Vec::new();

    for edge in ordered {
        if used.contains(&edge.pr_a) || used.contains(&edge.pr_b) {
            continue;
        }

        let mut members = vec![edge.pr_a, edge.pr_b];
        used.insert(edge.pr_a);
        used.insert(edge.pr_b);

        // Grow: a candidate needs a confirmed edge to every current member.
        let mut candidates: Vec<i64> = peers
            .keys()
            .filter(|pr| !used.contains(pr))
            .copied()
            .collect();
        candidates.sort_unstable();
        for candidate in candidates {
            if members.len() >= max_group_size {
                break;
            }
            let connected_to_all = members.iter().all(|member| {
                confidence_of.contains_key(&pair_key(candidate, *member))
            });
            if connected_to_all {
                members.push(candidate);
                used.insert(candidate);
            }
        }

        let confidence = average_confidence(&members, &confidence_of);
        cliques.push(Clique {
            members,
            confidence,
            relationship: edge.result.relationship,
        });
    }

    cliques.retain(|c| c.members.len() >= 2);
    cliques
}

fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Mean over every intra-clique edge that was actually confirmed.
fn average_confidence(members: &[i64], confidence_of: &HashMap<(i64, i64), f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            if let Some(c) = confidence_of.get(&pair_key(*a, *b)) {
                sum += c;
                count += 1;
            }
        }
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: i64, b: i64, dup: bool, confidence: f64) -> PairEdge {
        PairEdge {
            pr_a: a,
            pr_b: b,
            result: VerifyResult {
                is_duplicate: dup,
                confidence,
                relationship: Relationship::NearDuplicate,
                rationale: String::new(),
            },
        }
    }

    #[test]
    fn every_output_pair_had_a_confirmed_edge() {
        let edges = vec![
            edge(1, 2, true, 0.9),
            edge(2, 3, true, 0.8),
            edge(1, 3, true, 0.7),
            edge(4, 5, true, 0.95),
            edge(5, 6, true, 0.6), // 4-6 missing: 6 must stay out
        ];
        let cliques = group_cliques(&edges, 50);

        let confirmed: HashSet<(i64, i64)> = edges
            .iter()
            .map(|e| pair_key(e.pr_a, e.pr_b))
            .collect();
        for clique in &cliques {
            for (i, a) in clique.members.iter().enumerate() {
                for b in &clique.members[i + 1..] {
                    assert!(
                        confirmed.contains(&pair_key(*a, *b)),
                        "pair ({a},{b}) in output without a confirmed edge"
                    );
                }
            }
        }

        // {1,2,3} is a full clique; {4,5} cannot absorb 6.
        assert!(cliques.iter().any(|c| {
            let mut m = c.members.clone();
            m.sort_unstable();
            m == vec![1, 2, 3]
        }));
        assert!(cliques.iter().any(|c| {
            let mut m = c.members.clone();
            m.sort_unstable();
            m == vec![4, 5]
        }));
    }

    #[test]
    fn no_transitive_leakage() {
        // Exactly A↔B and B↔C: no group may contain both A and C.
        let edges = vec![edge(1, 2, true, 0.9), edge(2, 3, true, 0.85)];
        let cliques = group_cliques(&edges, 50);

        assert_eq!(cliques.len(), 1, "at most one group from a chain");
        for clique in &cliques {
            assert!(
                !(clique.members.contains(&1) && clique.members.contains(&3)),
                "transitive promotion leaked 1 and 3 into one group"
            );
        }
    }

    #[test]
    fn unconfirmed_edges_are_discarded() {
        let edges = vec![edge(1, 2, false, 0.99), edge(3, 4, true, 0.7)];
        let cliques = group_cliques(&edges, 50);
        assert_eq!(cliques.len(), 1);
        let mut m = cliques[0].members.clone();
        m.sort_unstable();
        assert_eq!(m, vec![3, 4]);
    }

    #[test]
    fn higher_confidence_edges_seed_first() {
        // 2 could pair with 1 or 3; the stronger edge wins the seed.
        let edges = vec![edge(1, 2, true, 0.6), edge(2, 3, true, 0.95)];
        let cliques = group_cliques(&edges, 50);
        assert_eq!(cliques.len(), 1);
        let mut m = cliques[0].members.clone();
        m.sort_unstable();
        assert_eq!(m, vec![2, 3]);
    }

    #[test]
    fn average_confidence_covers_all_intra_edges() {
        let edges = vec![
            edge(1, 2, true, 1.0),
            edge(1, 3, true, 0.8),
            edge(2, 3, true, 0.6),
        ];
        let cliques = group_cliques(&edges, 50);
        assert_eq!(cliques.len(), 1);
        assert!((cliques[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn oversized_equivalence_class_splits_at_cap() {
        // 150 PRs all pairwise confirmed (a full clique), cap 50.
        let mut edges = Vec::new();
        for a in 0i64..150 {
            for b in (a + 1)..150 {
                edges.push(edge(a, b, true, 0.9));
            }
        }
        let cliques = group_cliques(&edges, 50);
        assert!(cliques.iter().all(|c| c.members.len() <= 50));
        let total: usize = cliques.iter().map(|c| c.members.len()).sum();
        assert_eq!(total, 150, "every PR lands in exactly one group");
        assert_eq!(cliques.len(), 3);
    }
}
