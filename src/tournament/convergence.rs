//! File-level convergence analysis
//!
//! With two or more implemented competitors, the convergence ratio is the
//! intersection-over-union of their changed-file sets: 1.0 when they all
//! touched exactly the same files, 0.0 when the sets are disjoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::CompetitorResult;

/// Result of the file-level analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceAnalysis {
    /// |intersection| / |union|
    pub ratio: f64,

    /// Files every implemented competitor changed
    pub common_files: Vec<String>,

    /// Union of all changed files
    pub all_files: Vec<String>,
}

/// Analyse implemented competitors; `None` when fewer than two
pub fn analyze_convergence(competitors: &[CompetitorResult]) -> Option<ConvergenceAnalysis> {
    let sets: Vec<BTreeSet<&str>> = competitors
        .iter()
        .filter(|c| c.implemented)
        .map(|c| c.changed_files.iter().map(String::as_str).collect())
        .collect();

    if sets.len() < 2 {
        return None;
    }

    let mut union = sets[0].clone();
    let mut intersection = sets[0].clone();
    for set in &sets[1..] {
        union.extend(set.iter().copied());
        intersection = intersection.intersection(set).copied().collect();
    }

    // An implemented competitor has at least one changed file, so the
    // union is never empty here
    let ratio = intersection.len() as f64 / union.len() as f64;

    Some(ConvergenceAnalysis {
        ratio,
        common_files: intersection.into_iter().map(str::to_string).collect(),
        all_files: union.into_iter().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn competitor(id: &str, files: &[&str]) -> CompetitorResult {
        CompetitorResult {
            id: id.to_string(),
            strategy: "pragmatist".to_string(),
            implemented: !files.is_empty(),
            changed_files: files.iter().map(|s| s.to_string()).collect(),
            score: if files.is_empty() { 0 } else { 40 },
            cost: 0.1,
            diff: String::new(),
            diff_lines: 0,
            worktree: PathBuf::new(),
            error: None,
        }
    }

    #[test]
    fn test_identical_sets_converge_fully() {
        let competitors = vec![
            competitor("competitor-0", &["a.ts", "b.ts"]),
            competitor("competitor-1", &["a.ts", "b.ts"]),
        ];
        let analysis = analyze_convergence(&competitors).unwrap();
        assert_eq!(analysis.ratio, 1.0);
        assert_eq!(analysis.common_files, analysis.all_files);
    }

    #[test]
    fn test_disjoint_sets_do_not_converge() {
        let competitors = vec![
            competitor("competitor-0", &["a.ts"]),
            competitor("competitor-1", &["b.ts"]),
        ];
        let analysis = analyze_convergence(&competitors).unwrap();
        assert_eq!(analysis.ratio, 0.0);
        assert!(analysis.common_files.is_empty());
        assert_eq!(analysis.all_files.len(), 2);
    }

    #[test]
    fn test_partial_overlap() {
        let competitors = vec![
            competitor("competitor-0", &["a.ts", "b.ts"]),
            competitor("competitor-1", &["a.ts", "c.ts"]),
        ];
        let analysis = analyze_convergence(&competitors).unwrap();
        // intersection {a.ts}, union {a.ts, b.ts, c.ts}
        assert!((analysis.ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_three_way_intersection() {
        let competitors = vec![
            competitor("competitor-0", &["a.ts", "b.ts"]),
            competitor("competitor-1", &["a.ts", "b.ts", "c.ts"]),
            competitor("competitor-2", &["a.ts", "d.ts"]),
        ];
        let analysis = analyze_convergence(&competitors).unwrap();
        assert_eq!(analysis.common_files, vec!["a.ts".to_string()]);
        assert_eq!(analysis.all_files.len(), 4);
        assert!((analysis.ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unimplemented_competitors_excluded() {
        let competitors = vec![
            competitor("competitor-0", &["a.ts"]),
            competitor("competitor-1", &[]),
        ];
        assert!(analyze_convergence(&competitors).is_none());
    }

    #[test]
    fn test_single_competitor_has_no_analysis() {
        let competitors = vec![competitor("competitor-0", &["a.ts"])];
        assert!(analyze_convergence(&competitors).is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Ratio stays within bounds; ratio 1 implies identical sets
            #[test]
            fn ratio_bounds(file_sets in proptest::collection::vec(
                proptest::collection::btree_set("[a-e]\\.rs", 1..5), 2..5,
            )) {
                let competitors: Vec<CompetitorResult> = file_sets
                    .iter()
                    .enumerate()
                    .map(|(i, files)| {
                        let names: Vec<&str> = files.iter().map(String::as_str).collect();
                        competitor(&format!("competitor-{}", i), &names)
                    })
                    .collect();

                let analysis = analyze_convergence(&competitors).unwrap();
                prop_assert!(analysis.ratio >= 0.0);
                prop_assert!(analysis.ratio <= 1.0);
                if analysis.ratio == 1.0 {
                    prop_assert_eq!(&analysis.common_files, &analysis.all_files);
                }
            }
        }
    }
}
