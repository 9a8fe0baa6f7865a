use crate::config::HybridConfig;
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::popularity::PopularityTracker;
use crate::scorers::{CollaborativeScorer, ContentScorer, Recommender, TrainingData};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hybrid combiner: merges both base scorers into one candidate list and
/// re-ranks it for diversity with Maximal Marginal Relevance.
pub struct HybridRecommender {
    config: HybridConfig,
    content: Arc<ContentScorer>,
    collaborative: Arc<CollaborativeScorer>,
    popularity: Arc<PopularityTracker>,
}

/// Greedy MMR re-ranking over a candidate list already sorted by relevance.
///
/// Seeds with the single best candidate, then repeatedly takes the one
/// maximizing `trade_off * relevance - (1 - trade_off) * max_similarity`
/// against everything selected so far. `similarity` returns 0 for pairs it
/// has never scored. Ties keep encounter order.
pub fn mmr_rerank(
    candidates: Vec<ScoredItem>,
    count: usize,
    trade_off: f64,
    similarity: impl Fn(ItemId, ItemId) -> f32,
) -> Vec<ScoredItem> {
    if candidates.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut remaining = candidates;
    let mut selected = vec![remaining.remove(0)];

    while selected.len() < count && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (index, candidate) in remaining.iter().enumerate() {
            let max_similarity = selected
                .iter()
                .map(|chosen| similarity(candidate.item_id, chosen.item_id) as f64)
                .fold(0.0f64, f64::max);
            let score = trade_off * candidate.score - (1.0 - trade_off) * max_similarity;
            // Strict comparison: equal scores resolve to the earlier candidate.
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
        selected.push(remaining.remove(best_index));
    }

    selected
}

/// Merge per-scorer candidates into weighted hybrid scores. Items missing
/// from one scorer contribute 0 for that term; the live popularity boost is
/// folded in before ranking so trending items surface even in cold models.
pub(crate) fn merge_candidates(
    content: Vec<ScoredItem>,
    collaborative: Vec<ScoredItem>,
    content_weight: f64,
    collaborative_weight: f64,
    boost: impl Fn(ItemId) -> f64,
) -> Vec<ScoredItem> {
    let mut order: Vec<ItemId> = Vec::new();
    let mut scores: HashMap<ItemId, (f64, f64)> = HashMap::new();

    for item in content {
        let entry = scores.entry(item.item_id).or_insert_with(|| {
            order.push(item.item_id);
            (0.0, 0.0)
        });
        entry.0 = item.score;
    }
    for item in collaborative {
        let entry = scores.entry(item.item_id).or_insert_with(|| {
            order.push(item.item_id);
            (0.0, 0.0)
        });
        entry.1 = item.score;
    }

    let mut merged: Vec<ScoredItem> = order
        .into_iter()
        .map(|item_id| {
            let (content_score, collaborative_score) = scores[&item_id];
            let popularity_boost = boost(item_id);
            let weighted_content = content_weight * content_score;
            let weighted_collaborative = collaborative_weight * collaborative_score;
            ScoredItem {
                item_id,
                score: weighted_content + weighted_collaborative + popularity_boost,
                provenance: Provenance::Hybrid,
                explanation: format!(
                    "hybrid: content({:.3}) + collaborative({:.3}) + trending({:.3})",
                    weighted_content, weighted_collaborative, popularity_boost
                ),
            }
        })
        .collect();

    // Stable sort keeps encounter order for equal scores.
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

impl HybridRecommender {
    pub fn new(
        config: HybridConfig,
        content: Arc<ContentScorer>,
        collaborative: Arc<CollaborativeScorer>,
        popularity: Arc<PopularityTracker>,
    ) -> Self {
        Self {
            config,
            content,
            collaborative,
            popularity,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.content.is_trained() || self.collaborative.is_trained()
    }

    /// Train both scorers. Per-scorer failures are recorded, not raised:
    /// the hybrid layer is usable with either one alone.
    pub async fn train(&self, data: TrainingData<'_>) -> TrainingReport {
        let content = match self.content.train(data).await {
            Ok(summary) => TrainingOutcome::Trained(summary),
            Err(error) => {
                warn!(%error, "content training failed");
                TrainingOutcome::Failed {
                    error: error.to_string(),
                }
            }
        };
        let collaborative = match self.collaborative.train(data).await {
            Ok(summary) => TrainingOutcome::Trained(summary),
            Err(error) => {
                warn!(%error, "collaborative training failed");
                TrainingOutcome::Failed {
                    error: error.to_string(),
                }
            }
        };
        TrainingReport {
            content,
            collaborative,
        }
    }

    /// Hybrid prediction with diversity re-ranking at the given trade-off.
    pub async fn predict(
        &self,
        user: &UserProfile,
        count: usize,
        trade_off: f64,
    ) -> Result<Vec<ScoredItem>> {
        if !self.is_trained() {
            return Err(EngineError::InsufficientData(
                "no trained scorer available".to_string(),
            ));
        }

        // Over-fetch so the reranker has room to diversify.
        let fetch = count.saturating_mul(self.config.candidate_multiplier).max(count);

        let content_items = if self.content.is_trained() {
            match self.content.predict(user, fetch).await {
                Ok(items) => items,
                Err(error) => {
                    warn!(%error, "content prediction failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let collaborative_items = if self.collaborative.is_trained() {
            match self.collaborative.predict(user, fetch).await {
                Ok(items) => items,
                Err(error) => {
                    warn!(%error, "collaborative prediction failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if content_items.is_empty() && collaborative_items.is_empty() {
            // Last-resort cold start: serve whatever is trending right now.
            let trending: Vec<ScoredItem> = self
                .popularity
                .trending(count)
                .into_iter()
                .map(|record| ScoredItem {
                    item_id: record.item_id,
                    score: record.popularity_score,
                    provenance: Provenance::Popular,
                    explanation: "trending now".to_string(),
                })
                .collect();
            if trending.is_empty() {
                return Err(EngineError::InsufficientData(
                    "no scorer produced candidates and nothing is trending".to_string(),
                ));
            }
            debug!(user_id = user.user_id, "serving trending fallback");
            return Ok(trending);
        }

        let merged = merge_candidates(
            content_items,
            collaborative_items,
            self.config.content_weight,
            self.config.collaborative_weight,
            |item_id| self.popularity.boost_for(item_id),
        );

        // Without a similarity matrix, or without surplus candidates, the
        // plain hybrid ranking stands.
        let model = self.content.snapshot().await;
        match model {
            Some(model) if merged.len() > count => Ok(mmr_rerank(
                merged,
                count,
                trade_off,
                move |a, b| model.similarity_between(a, b).unwrap_or(0.0),
            )),
            _ => {
                let mut top = merged;
                top.truncate(count);
                Ok(top)
            }
        }
    }

    /// Aggregate both sub-explanations plus the static blend weights.
    pub async fn explain(&self, user: &UserProfile, item_id: ItemId) -> Result<String> {
        let mut parts = vec![format!(
            "hybrid blend: {:.0}% content, {:.0}% collaborative",
            self.config.content_weight * 100.0,
            self.config.collaborative_weight * 100.0
        )];
        if self.content.is_trained() {
            parts.push(format!("content: {}", self.content.explain(user, item_id).await?));
        }
        if self.collaborative.is_trained() {
            parts.push(format!(
                "collaborative: {}",
                self.collaborative.explain(user, item_id).await?
            ));
        }
        Ok(parts.join("; "))
    }
}
