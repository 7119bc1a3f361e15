//! Candidate pool and winner selection helpers
//!
//! Selection is layered: synthesis (when convergence justifies it), then an
//! AI judge, then a deterministic score-then-cost fallback. This module
//! holds the pure pieces; the engine drives the LLM calls.

use serde::Deserialize;
use tracing::debug;

use super::CompetitorResult;

/// Candidates eligible for selection
///
/// The passing set (implemented with a positive verification score) when it
/// is non-empty; otherwise all implemented competitors, which keeps the case
/// where verification is undefined. Empty means the tournament fails.
pub fn candidate_pool(competitors: &[CompetitorResult]) -> Vec<&CompetitorResult> {
    let passing: Vec<&CompetitorResult> = competitors
        .iter()
        .filter(|c| c.implemented && c.score > 0)
        .collect();

    if !passing.is_empty() {
        return passing;
    }

    competitors.iter().filter(|c| c.implemented).collect()
}

/// Sort candidates by verification score descending, then observed cost
/// ascending
pub fn sort_score_then_cost<'a>(candidates: &[&'a CompetitorResult]) -> Vec<&'a CompetitorResult> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal))
    });
    sorted
}

/// Structured output of the semantic convergence analysis call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvergenceVerdict {
    #[serde(default)]
    pub convergent_patterns: Vec<String>,

    #[serde(default)]
    pub divergent_approaches: Vec<String>,

    #[serde(default)]
    pub synthesis_viable: bool,
}

impl ConvergenceVerdict {
    /// Parse from a structured payload; malformed input reads as not viable
    pub fn parse(structured: Option<&serde_json::Value>) -> Self {
        match structured {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                debug!("Malformed convergence verdict: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JudgeOutput {
    winner: String,
    #[serde(default)]
    rationale: String,
}

/// Parse and validate a judge verdict; `None` falls through to the
/// score-then-cost fallback
pub fn parse_judge_verdict(
    structured: Option<&serde_json::Value>,
    candidate_ids: &[&str],
) -> Option<(String, String)> {
    let value = structured?;
    let output: JudgeOutput = match serde_json::from_value(value.clone()) {
        Ok(o) => o,
        Err(e) => {
            debug!("Malformed judge verdict: {}", e);
            return None;
        }
    };

    if !candidate_ids.contains(&output.winner.as_str()) {
        debug!(winner = %output.winner, "Judge picked a non-candidate");
        return None;
    }

    Some((output.winner, output.rationale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn competitor(id: &str, implemented: bool, score: u32, cost: f64) -> CompetitorResult {
        CompetitorResult {
            id: id.to_string(),
            strategy: "pragmatist".to_string(),
            implemented,
            changed_files: if implemented { vec!["a.rs".to_string()] } else { vec![] },
            score,
            cost,
            diff: if implemented { "+a".to_string() } else { String::new() },
            diff_lines: 1,
            worktree: PathBuf::new(),
            error: None,
        }
    }

    #[test]
    fn test_pool_prefers_passing_set() {
        let competitors = vec![
            competitor("competitor-0", true, 40, 0.1),
            competitor("competitor-1", true, 0, 0.1),
        ];
        let pool = candidate_pool(&competitors);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, "competitor-0");
    }

    #[test]
    fn test_pool_falls_back_to_implemented() {
        let competitors = vec![
            competitor("competitor-0", true, 0, 0.1),
            competitor("competitor-1", false, 0, 0.0),
        ];
        let pool = candidate_pool(&competitors);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, "competitor-0");
    }

    #[test]
    fn test_pool_empty_when_nothing_implemented() {
        let competitors = vec![competitor("competitor-0", false, 0, 0.0)];
        assert!(candidate_pool(&competitors).is_empty());
    }

    #[test]
    fn test_sort_score_desc_then_cost_asc() {
        let a = competitor("a", true, 70, 0.5);
        let b = competitor("b", true, 70, 0.2);
        let c = competitor("c", true, 40, 0.1);
        let refs = vec![&a, &b, &c];

        let sorted = sort_score_then_cost(&refs);
        assert_eq!(sorted[0].id, "b"); // same score, cheaper
        assert_eq!(sorted[1].id, "a");
        assert_eq!(sorted[2].id, "c");
    }

    #[test]
    fn test_judge_verdict_valid() {
        let structured = serde_json::json!({"winner": "competitor-1", "rationale": "cleaner"});
        let verdict = parse_judge_verdict(Some(&structured), &["competitor-0", "competitor-1"]);
        assert_eq!(verdict, Some(("competitor-1".to_string(), "cleaner".to_string())));
    }

    #[test]
    fn test_judge_verdict_rejects_non_candidate() {
        let structured = serde_json::json!({"winner": "competitor-9", "rationale": "x"});
        assert!(parse_judge_verdict(Some(&structured), &["competitor-0"]).is_none());
    }

    #[test]
    fn test_judge_verdict_rejects_malformed() {
        let structured = serde_json::json!({"champion": "competitor-0"});
        assert!(parse_judge_verdict(Some(&structured), &["competitor-0"]).is_none());
        assert!(parse_judge_verdict(None, &["competitor-0"]).is_none());
    }

    #[test]
    fn test_convergence_verdict_malformed_is_not_viable() {
        let verdict = ConvergenceVerdict::parse(Some(&serde_json::json!("not an object")));
        assert!(!verdict.synthesis_viable);

        let verdict = ConvergenceVerdict::parse(None);
        assert!(!verdict.synthesis_viable);
    }

    #[test]
    fn test_convergence_verdict_parses() {
        let structured = serde_json::json!({
            "convergent_patterns": ["both add a Parser struct"],
            "divergent_approaches": ["error type differs"],
            "synthesis_viable": true,
        });
        let verdict = ConvergenceVerdict::parse(Some(&structured));
        assert!(verdict.synthesis_viable);
        assert_eq!(verdict.convergent_patterns.len(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Selection ordering: predecessors never score lower, and ties
            // are broken by non-decreasing cost
            #[test]
            fn fallback_ordering_invariant(entries in proptest::collection::vec((0u32..100, 0.0f64..5.0), 1..8)) {
                let competitors: Vec<CompetitorResult> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, (score, cost))| competitor(&format!("competitor-{}", i), true, *score, *cost))
                    .collect();
                let refs: Vec<&CompetitorResult> = competitors.iter().collect();
                let sorted = sort_score_then_cost(&refs);

                for pair in sorted.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    prop_assert!(a.score > b.score || (a.score == b.score && a.cost <= b.cost));
                }
            }
        }
    }
}
