//! Exact k-NN and recall measurement helpers.

use std::collections::HashSet;

/// Cosine similarity; 0 if either vector is zero or dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// True if every component is zero. Such vectors have no direction.
pub fn is_zero_norm(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Brute-force top `k` ids by cosine similarity, ties going to larger ids.
pub fn exact_top_k<'a, I>(candidates: I, query: &[f32], k: usize) -> Vec<(u64, f32)>
where
    I: IntoIterator<Item = (u64, &'a [f32])>,
{
    let mut scored: Vec<(u64, f32)> = candidates
        .into_iter()
        .map(|(id, v)| (id, cosine_similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
    scored.truncate(k);
    scored
}

/// Fraction of `exact` ids present in `approx`. 1.0 when `exact` is empty.
pub fn recall_at_k(approx: &[u64], exact: &[u64]) -> f32 {
    if exact.is_empty() {
        return 1.0;
    }
    let found: HashSet<u64> = approx.iter().copied().collect();
    let overlap = exact.iter().filter(|id| found.contains(id)).count();
    overlap as f32 / exact.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_exact_top_k_orders_and_breaks_ties_by_recency() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let c = [1.0f32, 0.0];
        let candidates = vec![(1u64, &a[..]), (2, &b[..]), (3, &c[..])];
        let top = exact_top_k(candidates, &[1.0, 0.0], 2);
        assert_eq!(top.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn test_recall_at_k() {
        assert_eq!(recall_at_k(&[1, 2, 3], &[1, 2, 3]), 1.0);
        assert!((recall_at_k(&[1, 9, 8], &[1, 2, 3]) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(recall_at_k(&[], &[]), 1.0);
    }
}
