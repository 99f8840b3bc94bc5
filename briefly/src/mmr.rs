//! Maximal Marginal Relevance selection over embeddings.
//!
//! Each round picks the remaining item maximising
//! `lambda * sim(query, item) - (1 - lambda) * max(sim(item, already_selected))`.
//! With `lambda = 1` this is plain top-k by relevance. For small lambda the first
//! pick is still driven by relevance alone (nothing is selected yet, so every
//! redundancy is 0) and later picks mostly push away from what was chosen. At
//! exactly `lambda = 0` the first round is an all-zero tie and index 0 wins.

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Return up to `k` distinct indices into `items`, in selection order.
///
/// Ties go to the candidate that comes first in the remaining list, which keeps the
/// original index order because picks are removed without reordering the rest.
pub fn select(items: &[Vec<f32>], query: &[f32], k: usize, lambda: f32) -> Vec<usize> {
    let relevance: Vec<f32> = items
        .iter()
        .map(|item| cosine_similarity(query, item))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(items.len()));
    let mut remaining: Vec<usize> = (0..items.len()).collect();

    for _ in 0..k {
        if remaining.is_empty() {
            break;
        }

        let mut best: Option<(usize, f32)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(&items[i], &items[j]))
                .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |m| m.max(s))))
                .unwrap_or(0.0);

            let score = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((pos, score)),
            }
        }

        if let Some((pos, _)) = best {
            selected.push(remaining.remove(pos));
        }
    }

    selected
}
