//! Embedding vector math: normalization, centroid combination and the
//! distance functions the local store ranks neighbors with.

use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;
use crate::memory::Memory;

/// Distance function used for nearest-neighbor search.
///
/// Lower is closer for both variants. `Cosine` is `1 - cos(a, b)` and works on
/// unnormalized vectors; `Dot` is `1 - a·b` and assumes unit-length inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
}

impl DistanceMetric {
    /// Distance between `a` and `b`, or `None` if the vectors cannot be
    /// compared (length mismatch, or a zero vector under cosine).
    pub fn distance(self, a: &[f32], b: &[f32]) -> Option<f32> {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Dot => dot_distance(a, b),
        }
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `v` to unit Euclidean length.
///
/// Empty and all-zero vectors come back unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let n = norm(&v);
    if n < EPSILON {
        return v;
    }
    for x in &mut v {
        *x /= n;
    }
    v
}

/// Element-wise sum of `vectors`, normalized.
///
/// The first vector fixes the dimension; any vector of a different length is
/// skipped with a warning. Returns `None` when nothing usable remains.
pub fn combine<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f32>> = None;

    for v in vectors {
        match &mut sum {
            None => {
                if v.is_empty() {
                    continue;
                }
                sum = Some(v.to_vec());
            }
            Some(acc) => {
                if v.len() != acc.len() {
                    tracing::warn!(
                        expected = acc.len(),
                        got = v.len(),
                        "skipping embedding with mismatched dimension"
                    );
                    continue;
                }
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += x;
                }
            }
        }
    }

    sum.map(normalize)
}

/// Context centroid of every prompt and response embedding in `memories`.
pub fn combine_embeddings(memories: &[Memory]) -> Option<Vec<f32>> {
    combine(memories.iter().flat_map(|m| {
        m.prompt_embedding
            .as_deref()
            .into_iter()
            .chain(m.response_embedding.as_deref())
    }))
}

/// `1 - cos(a, b)`. Range `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let denom = norm(a) * norm(b);
    if denom < EPSILON {
        return None;
    }
    Some(1.0 - (dot(a, b) / denom).clamp(-1.0, 1.0))
}

/// `1 - a·b`. Only meaningful for unit vectors.
pub fn dot_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(1.0 - dot(a, b))
}
