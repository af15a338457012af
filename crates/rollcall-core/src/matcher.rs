//! Identity matching: nearest gallery row by cosine similarity.

use crate::gallery::Gallery;
use crate::types::{Embedding, StudentId, SIMILARITY_EPSILON};
use ndarray::{aview1, Axis};

/// Similarity a match must strictly exceed to be accepted.
pub const DEFAULT_THRESHOLD: f32 = 0.45;

/// A probe resolved to a gallery identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: String,
    pub id: StudentId,
    /// Cosine similarity of the best row.
    pub score: f32,
    /// Gallery row that produced the match.
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known(MatchResult),
    /// No row exceeded the threshold. `best_score` is `None` when nothing was
    /// compared (empty gallery, dimension mismatch, non-finite probe).
    Unknown { best_score: Option<f32> },
}

impl MatchOutcome {
    pub fn is_known(&self) -> bool {
        matches!(self, MatchOutcome::Known(_))
    }
}

/// Cosine similarity from a dot product and the two norms. Zero vectors score
/// 0.0 rather than NaN.
pub fn cosine(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    dot / (norm_a * norm_b + SIMILARITY_EPSILON)
}

/// Strategy for resolving a probe embedding against the gallery.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchOutcome;
}

/// Exhaustive cosine matcher: one matrix-vector product per probe.
///
/// Cost is O(N·D) per query. Large galleries would want an approximate
/// nearest-neighbour index here instead.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchOutcome {
        if gallery.is_empty() {
            return MatchOutcome::Unknown { best_score: None };
        }
        if probe.dim() != gallery.dim() {
            tracing::warn!(
                probe_dim = probe.dim(),
                gallery_dim = gallery.dim(),
                "probe dimension does not match gallery; treating as unknown"
            );
            return MatchOutcome::Unknown { best_score: None };
        }

        let matrix = gallery.embeddings();
        let q = aview1(&probe.values[..]);
        let q_norm = q.dot(&q).sqrt();
        let dots = matrix.dot(&q);
        let row_norms = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        // Strict `>` keeps the first index on exact ties.
        let mut best_row = None;
        let mut best_score = f32::NEG_INFINITY;
        for (i, (dot, norm)) in dots.iter().zip(row_norms.iter()).enumerate() {
            let sim = cosine(*dot, *norm, q_norm);
            if sim > best_score {
                best_score = sim;
                best_row = Some(i);
            }
        }

        match best_row {
            Some(row) if best_score > threshold => MatchOutcome::Known(MatchResult {
                name: gallery.names()[row].clone(),
                id: gallery.ids()[row].clone(),
                score: best_score,
                row,
            }),
            Some(_) => MatchOutcome::Unknown {
                best_score: Some(best_score),
            },
            None => MatchOutcome::Unknown { best_score: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(rows: Vec<(&str, &str, Vec<f32>)>) -> Gallery {
        Gallery::from_parts(
            rows.iter().map(|(_, _, e)| e.clone()).collect(),
            rows.iter().map(|(n, _, _)| n.to_string()).collect(),
            rows.iter().map(|(_, i, _)| i.parse().unwrap()).collect(),
        )
        .unwrap()
    }

    fn known(outcome: MatchOutcome) -> MatchResult {
        match outcome {
            MatchOutcome::Known(m) => m,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_row_matches_with_unit_score() {
        let g = gallery(vec![
            ("Alice", "001", vec![0.2, 0.9, 0.1]),
            ("Bob", "002", vec![0.7, 0.1, 0.7]),
        ]);
        for row in 0..g.len() {
            let probe = Embedding::new(g.row(row).to_vec());
            let m = known(CosineMatcher.best_match(&probe, &g, 0.99));
            assert_eq!(m.row, row);
            assert_eq!(&m.id, &g.ids()[row]);
            assert!((m.score - 1.0).abs() < 1e-5, "score {}", m.score);
        }
    }

    #[test]
    fn test_scan_reaches_last_row() {
        let g = gallery(vec![
            ("decoy1", "001", vec![0.0, 1.0, 0.0]),
            ("decoy2", "002", vec![0.0, 0.0, 1.0]),
            ("match", "003", vec![1.0, 0.0, 0.0]),
        ]);
        let m = known(CosineMatcher.best_match(&Embedding::new(vec![1.0, 0.0, 0.0]), &g, 0.5));
        assert_eq!(m.name, "match");
        assert_eq!(m.id.as_str(), "003");
    }

    #[test]
    fn test_orthogonal_probe_is_unknown() {
        let g = gallery(vec![("Alice", "001", vec![1.0, 0.0, 0.0]), ("Bob", "002", vec![0.0, 1.0, 0.0])]);
        let outcome = CosineMatcher.best_match(&Embedding::new(vec![0.0, 0.0, 1.0]), &g, DEFAULT_THRESHOLD);
        match outcome {
            MatchOutcome::Unknown { best_score: Some(s) } => assert!(s.abs() < 1e-6),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine(1.0, 1.0, 1.0) - 1.0).abs() < 1e-5);
        assert!((cosine(-2.0, 1.0, 2.0) + 1.0).abs() < 1e-5);
        assert_eq!(cosine(0.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // cos = 0.6 between (1, 0) and (0.6, 0.8)
        let g = gallery(vec![("Alice", "001", vec![1.0, 0.0])]);
        let probe = Embedding::new(vec![0.6, 0.8]);
        assert!(CosineMatcher.best_match(&probe, &g, 0.5).is_known());
        assert!(!CosineMatcher.best_match(&probe, &g, 0.7).is_known());
    }

    #[test]
    fn test_exact_tie_first_row_wins() {
        let g = gallery(vec![
            ("First", "001", vec![1.0, 0.0]),
            ("Second", "002", vec![1.0, 0.0]),
        ]);
        let m = known(CosineMatcher.best_match(&Embedding::new(vec![1.0, 0.0]), &g, 0.5));
        assert_eq!(m.row, 0);
        assert_eq!(m.name, "First");
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let outcome = CosineMatcher.best_match(&Embedding::new(vec![1.0, 0.0]), &Gallery::empty(), 0.0);
        assert_eq!(outcome, MatchOutcome::Unknown { best_score: None });
    }

    #[test]
    fn test_dimension_mismatch_is_unknown() {
        let g = gallery(vec![("Alice", "001", vec![1.0, 0.0])]);
        let outcome = CosineMatcher.best_match(&Embedding::new(vec![1.0, 0.0, 0.0]), &g, 0.0);
        assert_eq!(outcome, MatchOutcome::Unknown { best_score: None });
    }

    #[test]
    fn test_zero_probe_scores_zero() {
        let g = gallery(vec![("Alice", "001", vec![1.0, 0.0])]);
        let outcome = CosineMatcher.best_match(&Embedding::new(vec![0.0, 0.0]), &g, DEFAULT_THRESHOLD);
        assert_eq!(outcome, MatchOutcome::Unknown { best_score: Some(0.0) });
    }

    #[test]
    fn test_scale_invariant() {
        let g = gallery(vec![("Alice", "001", vec![3.0, 4.0])]);
        let m = known(CosineMatcher.best_match(&Embedding::new(vec![30.0, 40.0]), &g, 0.9));
        assert!((m.score - 1.0).abs() < 1e-5);
    }
}
