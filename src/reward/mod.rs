use crate::config::RewardConfig;
use crate::models::{CatalogItem, ItemId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-component breakdown of one list's reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub ndcg: f64,
    pub diversity: f64,
    pub novelty: f64,
    pub composite: f64,
}

/// Scores a served recommendation list against observed user feedback.
///
/// The composite reward blends ranking quality (NDCG over graded
/// relevance), category diversity (Simpson index) and novelty (inverse
/// log-popularity). Every component and the composite live in [0, 1] so the
/// bandit sees a stationary reward scale.
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Graded relevance of one recommended item. An explicit rating
    /// dominates; without one, lightweight interactions earn partial
    /// credit capped below the lowest rated grade.
    pub fn graded_relevance(&self, rating: Option<f64>, interactions: u64) -> f64 {
        match rating {
            Some(r) if r >= 4.0 => 3.0,
            Some(r) if r >= 3.0 => 2.0,
            Some(_) => 0.0,
            None => (interactions as f64 * 0.5).min(1.0),
        }
    }

    /// NDCG@k over graded relevances in served order. No positive signal
    /// anywhere in the list means the ideal DCG is zero and the score is 0.
    pub fn ndcg(&self, relevances: &[f64]) -> f64 {
        let k = self.config.ndcg_k.min(relevances.len());
        if k == 0 {
            return 0.0;
        }

        let dcg = Self::dcg(&relevances[..k]);
        let mut ideal: Vec<f64> = relevances.to_vec();
        ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let idcg = Self::dcg(&ideal[..k]);
        if idcg <= 0.0 {
            return 0.0;
        }
        (dcg / idcg).clamp(0.0, 1.0)
    }

    fn dcg(relevances: &[f64]) -> f64 {
        relevances
            .iter()
            .enumerate()
            .map(|(i, &rel)| rel / ((i + 2) as f64).log2())
            .sum()
    }

    /// Simpson diversity over primary categories: 1 - sum(p^2). One item
    /// (or none) has no diversity to measure and scores 0.
    pub fn diversity(&self, items: &[&CatalogItem]) -> f64 {
        if items.len() <= 1 {
            return 0.0;
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for item in items {
            *counts.entry(item.primary_category()).or_insert(0) += 1;
        }
        let total = items.len() as f64;
        let concentration: f64 = counts
            .values()
            .map(|&count| {
                let p = count as f64 / total;
                p * p
            })
            .sum();
        (1.0 - concentration).clamp(0.0, 1.0)
    }

    /// Mean inverse log-popularity of the list, normalized into [0, 1].
    /// Zero popularity is floored to a small positive value so the
    /// logarithm stays defined and never-seen items rank as the most novel.
    pub fn novelty(&self, popularities: &[f64]) -> f64 {
        if popularities.is_empty() {
            return 0.0;
        }
        let sum: f64 = popularities
            .iter()
            .map(|&pop| {
                let pop = pop.max(0.1);
                -(pop / self.config.popularity_scale).min(1.0).log2()
            })
            .sum();
        let mean = sum / popularities.len() as f64;
        (mean / self.config.max_novelty).clamp(0.0, 1.0)
    }

    pub fn composite(&self, ndcg: f64, diversity: f64, novelty: f64) -> f64 {
        let blended = self.config.ndcg_weight * ndcg
            + self.config.diversity_weight * diversity
            + self.config.novelty_weight * novelty;
        blended.clamp(0.0, 1.0)
    }

    /// Full evaluation of a served list: relevances from the user's ratings
    /// and interaction counts, diversity from catalog categories, novelty
    /// from the popularity lookup.
    pub fn evaluate(
        &self,
        recommended: &[ItemId],
        catalog: &HashMap<ItemId, CatalogItem>,
        ratings: &HashMap<ItemId, f64>,
        interaction_counts: &HashMap<ItemId, u64>,
        popularity: impl Fn(ItemId) -> f64,
    ) -> RewardBreakdown {
        let relevances: Vec<f64> = recommended
            .iter()
            .map(|id| {
                self.graded_relevance(
                    ratings.get(id).copied(),
                    interaction_counts.get(id).copied().unwrap_or(0),
                )
            })
            .collect();
        let items: Vec<&CatalogItem> = recommended
            .iter()
            .filter_map(|id| catalog.get(id))
            .collect();
        let popularities: Vec<f64> = recommended.iter().map(|&id| popularity(id)).collect();

        let ndcg = self.ndcg(&relevances);
        let diversity = self.diversity(&items);
        let novelty = self.novelty(&popularities);
        RewardBreakdown {
            ndcg,
            diversity,
            novelty,
            composite: self.composite(ndcg, diversity, novelty),
        }
    }
}
