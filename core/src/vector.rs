//! Embedding blob codec and similarity math.
//!
//! A stored vector is its `f32` components as consecutive little-endian
//! IEEE-754 words, with no header; the length is the byte count / 4.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    #[error("vector blob of {0} bytes is not a whole number of f32 values")]
    TruncatedBlob(usize),
    #[error("vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`encode`]. Rejects blobs whose length is not a multiple of 4.
pub fn decode(blob: &[u8]) -> Result<Vec<f32>, VectorError> {
    if blob.len() % 4 != 0 {
        return Err(VectorError::TruncatedBlob(blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// [`decode`] plus a check against the model's declared dimensionality.
pub fn decode_with_dim(blob: &[u8], expected: usize) -> Result<Vec<f32>, VectorError> {
    let v = decode(blob)?;
    if v.len() != expected {
        return Err(VectorError::DimensionMismatch { expected, actual: v.len() });
    }
    Ok(v)
}

/// Cosine similarity in `[-1, 1]`. Mismatched lengths and zero vectors give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Component-wise mean. All vectors must share one length; `None` for an
/// empty input.
pub fn centroid(vectors: &[Vec<f32>]) -> Result<Option<Vec<f32>>, VectorError> {
    let Some(first) = vectors.first() else { return Ok(None) };
    let dim = first.len();
    let mut sum = vec![0.0f64; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(VectorError::DimensionMismatch { expected: dim, actual: v.len() });
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
    }
    let n = vectors.len() as f64;
    Ok(Some(sum.into_iter().map(|s| (s / n) as f32).collect()))
}
