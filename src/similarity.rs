//! Vector math for segment embeddings
//!
//! Cosine similarity drives the clustering distance; Euclidean distance is
//! used to spot degenerate inputs where every vector is the same point.

/// Cosine similarity between two embedding vectors
/// Returns a value between -1.0 and 1.0 (1.0 = identical, 0.0 = orthogonal)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine distance in [0, 2], computed in f64 for the linkage matrix
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    (1.0 - cosine_similarity(a, b) as f64).max(0.0)
}

/// Euclidean distance between two vectors of equal length
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Compute the centroid (average) of multiple embeddings
/// Returns a normalized centroid vector
pub fn compute_centroid(embeddings: &[&[f32]]) -> Option<Vec<f32>> {
    if embeddings.is_empty() {
        return None;
    }

    let dim = embeddings[0].len();
    if dim == 0 {
        return None;
    }

    let mut centroid = vec![0.0f32; dim];
    let mut counted = 0usize;
    for emb in embeddings {
        if emb.len() != dim {
            continue; // Skip mismatched dimensions
        }
        for (i, &val) in emb.iter().enumerate() {
            centroid[i] += val;
        }
        counted += 1;
    }

    let n = counted as f32;
    for val in &mut centroid {
        *val /= n;
    }

    // Normalize (L2 norm)
    let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        for val in &mut centroid {
            *val /= norm;
        }
    }

    Some(centroid)
}

/// True when every vector lies within `epsilon` of the first one
pub fn all_within(vectors: &[&[f32]], epsilon: f32) -> bool {
    match vectors.split_first() {
        None => true,
        Some((first, rest)) => rest
            .iter()
            .all(|v| euclidean_distance(first, v) <= epsilon),
    }
}
