//! Confidence from nearest-neighbor agreement.

use insight_vector::cosine_similarity;

/// Estimate how well the indexed context supports answering a prompt.
///
/// `neighbors` are (similarity to the prompt, neighbor vector) pairs. The
/// result averages relevance (mean similarity to the prompt) and agreement
/// (mean pairwise similarity among neighbors), clamped to [0, 1]. No
/// neighbors means no confidence.
pub fn neighbor_confidence(neighbors: &[(f32, &[f32])]) -> f32 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let relevance =
        neighbors.iter().map(|(score, _)| score.max(0.0)).sum::<f32>() / neighbors.len() as f32;

    let agreement = if neighbors.len() < 2 {
        relevance
    } else {
        let mut total = 0.0f32;
        let mut pairs = 0usize;
        for (i, (_, a)) in neighbors.iter().enumerate() {
            for (_, b) in &neighbors[i + 1..] {
                total += cosine_similarity(a, b).max(0.0);
                pairs += 1;
            }
        }
        total / pairs as f32
    };

    ((relevance + agreement) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_neighbors() {
        assert_eq!(neighbor_confidence(&[]), 0.0);
    }

    #[test]
    fn test_agreeing_neighbors_score_higher() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.9f32, 0.1, 0.0];
        let c = [0.0f32, 0.0, 1.0];
        let agreeing = neighbor_confidence(&[(0.8, &a[..]), (0.8, &b[..])]);
        let split = neighbor_confidence(&[(0.8, &a[..]), (0.8, &c[..])]);
        assert!(agreeing > split);
        assert!((split - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_single_neighbor_uses_relevance() {
        let a = [1.0f32, 0.0];
        assert!((neighbor_confidence(&[(0.6, &a[..])]) - 0.6).abs() < 1e-6);
        assert_eq!(neighbor_confidence(&[(-0.5, &a[..])]), 0.0);
    }
}
