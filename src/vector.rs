//! Vector math for dedup and ranking.

/// Cosine similarity of two vectors, computed in `f64`.
///
/// Returns 0.0 when either vector has zero norm or when the lengths
/// differ, so callers never divide by zero.
///
/// ```
/// use ace_playbook::vector::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // One sqrt of the product: identical vectors give exactly 1.0.
    let similarity = dot / (norm_a * norm_b).sqrt();
    similarity.clamp(-1.0, 1.0)
}
