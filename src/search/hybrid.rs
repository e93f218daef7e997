// src/search/hybrid.rs
// Weighted fusion of keyword and (optional) vector rankings

use crate::error::Result;
use std::collections::HashMap;

/// Relative weights for the two score sources. Must sum to 1 for the
/// fused score to stay in the native range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f64,
    pub keyword: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            keyword: 0.3,
        }
    }
}

/// Vector component contract. The core ships no implementation; when no
/// provider is wired in, callers report keyword-only results without error.
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output dimension of `embed`.
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Rescale a score list into [0, 1] by `(x - min) / (max - min)`.
/// The degenerate `max == min` list maps every element to 1.0.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let Some(first) = scores.first() else {
        return Vec::new();
    };
    let (min, max) = scores.iter().fold((*first, *first), |(lo, hi), &s| {
        (lo.min(s), hi.max(s))
    });
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|&s| (s - min) / (max - min)).collect()
}

/// Merge two ranked `(doc_id, score)` lists by weighted sum.
///
/// A document present in both lists scores `w_k * k + w_v * v`; one
/// present in a single list keeps its native score. Output is ordered by
/// descending fused score with doc-id tie-breaks.
pub fn fuse(
    keyword: &[(String, f64)],
    vector: &[(String, f64)],
    weights: FusionWeights,
) -> Vec<(String, f64)> {
    let keyword_scores: HashMap<&str, f64> =
        keyword.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    let vector_scores: HashMap<&str, f64> =
        vector.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let mut fused: HashMap<&str, f64> = HashMap::new();
    for (&id, &k) in &keyword_scores {
        match vector_scores.get(id) {
            Some(&v) => {
                fused.insert(id, weights.keyword * k + weights.vector * v);
            }
            None => {
                fused.insert(id, k);
            }
        }
    }
    for (&id, &v) in &vector_scores {
        fused.entry(id).or_insert(v);
    }

    let mut out: Vec<(String, f64)> = fused
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

/// Cosine similarity over two equal-length vectors.
///
/// Undefined cases (zero vector, mismatched lengths, empty input)
/// resolve to 0.0 without erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
