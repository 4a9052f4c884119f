//! Embedding comparison and the accept/reject decision.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embeddings come from different model packs ({0} vs {1})")]
    PackMismatch(String, String),
    #[error("embedding dimensions differ ({0} vs {1})")]
    DimensionMismatch(usize, usize),
}

/// Cosine similarity of two unit-normalized embeddings, as their dot product.
///
/// Range is [-1, 1]. Embeddings from different packs, or of different
/// lengths, are refused rather than scored.
pub fn score(a: &Embedding, b: &Embedding) -> Result<f32, SimilarityError> {
    if a.pack != b.pack {
        return Err(SimilarityError::PackMismatch(a.pack.clone(), b.pack.clone()));
    }
    if a.dim() != b.dim() {
        return Err(SimilarityError::DimensionMismatch(a.dim(), b.dim()));
    }
    Ok(a.values.iter().zip(&b.values).map(|(x, y)| x * y).sum())
}

/// Accept iff `score >= threshold`.
pub fn decide(score: f32, threshold: f32) -> bool {
    score >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding::normalized(values, "pack-a")
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = emb(vec![0.3, -1.2, 4.0, 0.01]);
        let s = score(&a, &a).unwrap();
        assert!((s - 1.0).abs() < 1e-5);
        assert!(decide(1.0, 0.70));
        assert!(decide(1.0, 1.0));
    }

    #[test]
    fn test_symmetric() {
        let a = emb(vec![1.0, 2.0, 3.0]);
        let b = emb(vec![-0.5, 2.0, 0.25]);
        assert_eq!(score(&a, &b).unwrap(), score(&b, &a).unwrap());
    }

    #[test]
    fn test_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(score(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((score(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decide_boundary() {
        assert!(decide(0.70, 0.70));
        assert!(!decide(0.6999, 0.70));
    }

    #[test]
    fn test_pack_mismatch_refused() {
        let a = emb(vec![1.0, 0.0]);
        let b = Embedding::normalized(vec![1.0, 0.0], "pack-b");
        assert_eq!(
            score(&a, &b),
            Err(SimilarityError::PackMismatch("pack-a".into(), "pack-b".into()))
        );
    }

    #[test]
    fn test_dimension_mismatch_refused() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert_eq!(score(&a, &b), Err(SimilarityError::DimensionMismatch(2, 3)));
    }
}
